//! Server Status Tests

use relaykv::ServerStatus;

#[test]
fn test_unknown_code_is_internal() {
    assert_eq!(ServerStatus::from_code(2), ServerStatus::Internal);
    assert_eq!(ServerStatus::from_code(200), ServerStatus::Internal);
}

#[test]
fn test_txn_ok_allow_list() {
    assert!(ServerStatus::Success.is_txn_ok());
    assert!(ServerStatus::RecordLocked.is_txn_ok());
    assert!(ServerStatus::InconsistentState.is_txn_ok());
    assert!(!ServerStatus::ServerBusy.is_txn_ok());
    assert!(!ServerStatus::BadParam.is_txn_ok());
    assert!(!ServerStatus::Internal.is_txn_ok());
}

#[test]
fn test_inconsistent_state_reads_as_success() {
    assert_eq!(ServerStatus::InconsistentState.normalized(), ServerStatus::Success);
    assert_eq!(ServerStatus::NoKey.normalized(), ServerStatus::NoKey);
}
