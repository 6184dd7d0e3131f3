//! # Protocol Names and Constants
//!
//! Message and parameter names the synchronization core depends on. These
//! form the built-in minimum of the white lists and can never be filtered
//! out by the operator.

/// Sentinel name for frames that failed to decode
pub const BAD_DATA: &str = "BAD_DATA";
/// Prefix of the sentinel name for frames with an unknown message id
pub const UNKNOWN: &str = "UNKNOWN";

pub const HEARTBEAT: &str = "HEARTBEAT";
pub const COMMAND_ACK: &str = "COMMAND_ACK";
pub const PARAM_VALUE: &str = "PARAM_VALUE";
pub const MISSION_COUNT: &str = "MISSION_COUNT";
pub const MISSION_ITEM_INT: &str = "MISSION_ITEM_INT";
pub const MISSION_ACK: &str = "MISSION_ACK";
pub const MISSION_REQUEST: &str = "MISSION_REQUEST";
pub const MISSION_REQUEST_INT: &str = "MISSION_REQUEST_INT";
pub const FENCE_POINT: &str = "FENCE_POINT";
pub const RALLY_POINT: &str = "RALLY_POINT";
pub const HOME_POSITION: &str = "HOME_POSITION";

/// Messages that must always pass the filter for the protocol to work
pub const BUILTIN_MESSAGES: &[&str] = &[
    BAD_DATA,
    UNKNOWN,
    COMMAND_ACK,
    PARAM_VALUE,
    MISSION_COUNT,
    MISSION_ITEM_INT,
    MISSION_ACK,
    MISSION_REQUEST,
    MISSION_REQUEST_INT,
    FENCE_POINT,
    RALLY_POINT,
    HOME_POSITION,
    HEARTBEAT,
];

pub const RALLY_TOTAL: &str = "RALLY_TOTAL";
pub const FENCE_ACTION: &str = "FENCE_ACTION";
pub const FENCE_TOTAL: &str = "FENCE_TOTAL";
pub const STAT_RESET: &str = "STAT_RESET";
pub const STAT_BOOTCNT: &str = "STAT_BOOTCNT";
pub const STAT_FLTTIME: &str = "STAT_FLTTIME";
pub const STAT_RUNTIME: &str = "STAT_RUNTIME";
pub const SYSID_THISMAV: &str = "SYSID_THISMAV";

/// Parameters that must always pass the filter for the protocol to work
pub const BUILTIN_PARAMETERS: &[&str] = &[
    RALLY_TOTAL,
    FENCE_ACTION,
    FENCE_TOTAL,
    STAT_RESET,
    STAT_BOOTCNT,
    STAT_FLTTIME,
    STAT_RUNTIME,
    SYSID_THISMAV,
];

/// HOME_POSITION message id, used with SET_MESSAGE_INTERVAL
pub const HOME_POSITION_ID: u32 = 242;

/// Frequency at which HOME_POSITION is requested until it arrives
pub const HOME_POSITION_RATE_HZ: f64 = 0.2;

/// MAV_MISSION_TYPE_MISSION
pub const MISSION_TYPE_MISSION: u8 = 0;

/// MAV_MISSION_ACCEPTED
pub const MISSION_ACCEPTED: u8 = 0;

/// Maximum parameter name length in characters
pub const PARAM_ID_MAX_LEN: usize = 16;

/// Whether a message name is a sentinel for undecodable data
pub fn is_bad_data(name: &str) -> bool {
    name == BAD_DATA || name.starts_with(UNKNOWN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_lists_cover_sync_messages() {
        for name in [PARAM_VALUE, MISSION_COUNT, MISSION_ITEM_INT, FENCE_POINT, RALLY_POINT] {
            assert!(BUILTIN_MESSAGES.contains(&name), "{} must be built in", name);
        }
        for name in [FENCE_TOTAL, RALLY_TOTAL, SYSID_THISMAV] {
            assert!(BUILTIN_PARAMETERS.contains(&name), "{} must be built in", name);
        }
    }

    #[test]
    fn test_bad_data_sentinels() {
        assert!(is_bad_data("BAD_DATA"));
        assert!(is_bad_data("UNKNOWN_12345"));
        assert!(!is_bad_data("ATTITUDE"));
    }

    #[test]
    fn test_builtin_parameter_names_fit_param_id() {
        for name in BUILTIN_PARAMETERS {
            assert!(name.len() <= PARAM_ID_MAX_LEN);
        }
    }
}
