use thiserror::Error;

use crate::common::error::DomainError;

use super::entity::IpFamily;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DscpError {
    #[error("invalid DSCP value: {value} (must be -1 or 0-63)")]
    InvalidDscp { value: i16 },

    #[error("invalid port range: {start}..{end}")]
    InvalidPortRange { start: u16, end: u16 },

    #[error("policy slot {index} out of range for {family} table (capacity {capacity})")]
    SlotOutOfRange {
        family: IpFamily,
        index: usize,
        capacity: usize,
    },

    #[error("{count} policies exceed {family} table capacity {capacity}")]
    TooManyPolicies {
        family: IpFamily,
        count: usize,
        capacity: usize,
    },

    #[error("{field} address {addr} does not belong in the {family} table")]
    FamilyMismatch {
        family: IpFamily,
        field: &'static str,
        addr: std::net::Ipv6Addr,
    },
}

impl From<DscpError> for DomainError {
    fn from(e: DscpError) -> Self {
        match e {
            DscpError::SlotOutOfRange { .. } | DscpError::TooManyPolicies { .. } => {
                DomainError::InvalidConfig(e.to_string())
            }
            other => DomainError::InvalidRule(other.to_string()),
        }
    }
}
