use serde::{Deserialize, Serialize};
use crate::error::{HelmError, Result};

/// Which of the twin actuators a gear or rudder instance drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side{
    Left,
    Right,
}

impl Side{
    pub const BOTH: [Side; 2] = [Side::Left, Side::Right];

    /// Engine ids on the wire: 0 is port (left), 1 is starboard (right).
    pub fn from_engine_id(id: i32) -> Result<Self>{
        match id{
            0 => Ok(Side::Left),
            1 => Ok(Side::Right),
            other => Err(HelmError::UnknownEngine(other)),
        }
    }

    pub fn engine_id(&self) -> i32{
        match self{
            Side::Left => 0,
            Side::Right => 1,
        }
    }

    pub fn index(&self) -> usize{
        self.engine_id() as usize
    }

    pub fn letter(&self) -> &'static str{
        match self{
            Side::Left => "L",
            Side::Right => "R",
        }
    }
}

#[cfg(test)]
mod tests{
    use super::*;

    #[test]
    fn test_engine_id_mapping(){
        assert_eq!(Side::from_engine_id(0).unwrap(), Side::Left);
        assert_eq!(Side::from_engine_id(1).unwrap(), Side::Right);
        assert!(matches!(Side::from_engine_id(2), Err(HelmError::UnknownEngine(2))));
        assert_eq!(Side::Right.index(), 1);
    }
}
