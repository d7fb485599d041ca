//! Transaction state as stored in the `.xid` file.

/// The possible states of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// The transaction has begun and not finished yet.
    Active,
    /// The transaction has been successfully committed.
    Committed,
    /// The transaction has been aborted (rolled back).
    Aborted,
}

const FIELD_TRAN_ACTIVE: u8 = 0;
const FIELD_TRAN_COMMITTED: u8 = 1;
const FIELD_TRAN_ABORTED: u8 = 2;

impl TransactionState {
    /// Returns true if the transaction is active.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    /// Returns true if the transaction is committed.
    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed)
    }

    /// Returns true if the transaction is aborted.
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted)
    }

    /// Returns true if the transaction is finished (committed or aborted).
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Committed | Self::Aborted)
    }

    pub fn to_byte(self) -> u8 {
        match self {
            Self::Active => FIELD_TRAN_ACTIVE,
            Self::Committed => FIELD_TRAN_COMMITTED,
            Self::Aborted => FIELD_TRAN_ABORTED,
        }
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            FIELD_TRAN_ACTIVE => Some(Self::Active),
            FIELD_TRAN_COMMITTED => Some(Self::Committed),
            FIELD_TRAN_ABORTED => Some(Self::Aborted),
            _ => None,
        }
    }
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "Active"),
            Self::Committed => write!(f, "Committed"),
            Self::Aborted => write!(f, "Aborted"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_state() {
        let active = TransactionState::Active;
        let committed = TransactionState::Committed;
        let aborted = TransactionState::Aborted;

        assert!(active.is_active());
        assert!(!active.is_committed());
        assert!(!active.is_aborted());
        assert!(!active.is_finished());

        assert!(!committed.is_active());
        assert!(committed.is_committed());
        assert!(!committed.is_aborted());
        assert!(committed.is_finished());

        assert!(!aborted.is_active());
        assert!(!aborted.is_committed());
        assert!(aborted.is_aborted());
        assert!(aborted.is_finished());
    }

    #[test]
    fn test_transaction_state_display() {
        assert_eq!(format!("{}", TransactionState::Active), "Active");
        assert_eq!(format!("{}", TransactionState::Committed), "Committed");
        assert_eq!(format!("{}", TransactionState::Aborted), "Aborted");
    }

    #[test]
    fn test_byte_codes() {
        assert_eq!(TransactionState::Active.to_byte(), 0);
        assert_eq!(TransactionState::Committed.to_byte(), 1);
        assert_eq!(TransactionState::Aborted.to_byte(), 2);

        for state in [
            TransactionState::Active,
            TransactionState::Committed,
            TransactionState::Aborted,
        ] {
            assert_eq!(TransactionState::from_byte(state.to_byte()), Some(state));
        }
        assert_eq!(TransactionState::from_byte(3), None);
    }
}
