use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::RecordError;

/// A test station. Every record needs one completed result per station.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Machine {
    G1,
    G2,
    G3,
}

impl Machine {
    /// All stations in resolution order.
    pub const ALL: [Machine; 3] = [Machine::G1, Machine::G2, Machine::G3];

    pub fn as_str(&self) -> &'static str {
        match self {
            Machine::G1 => "G1",
            Machine::G2 => "G2",
            Machine::G3 => "G3",
        }
    }
}

impl fmt::Display for Machine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Machine {
    type Err = RecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "G1" => Ok(Machine::G1),
            "G2" => Ok(Machine::G2),
            "G3" => Ok(Machine::G3),
            _ => Err(RecordError::UnknownMachine(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_case_insensitively() {
        assert_eq!("g2".parse::<Machine>().unwrap(), Machine::G2);
        assert_eq!(" G3 ".parse::<Machine>().unwrap(), Machine::G3);
    }

    #[test]
    fn rejects_unknown_station() {
        let err = "G4".parse::<Machine>().unwrap_err();
        assert_eq!(err, RecordError::UnknownMachine("G4".to_string()));
    }
}
