//! Tests for error handling

use rdb_core::error::{DebuggerError, Result};
use rdb_core::types::ProgramState;

#[test]
fn test_debugger_error_display()
{
    let error = DebuggerError::MissingSection(".debug_line");
    let message = format!("{}", error);
    assert!(message.contains("Missing section"));
    assert!(message.contains(".debug_line"));
}

#[test]
fn test_invalid_state_names_operation_and_state()
{
    let error = DebuggerError::InvalidState {
        operation: "continue",
        state: ProgramState::Exited,
    };
    assert_eq!(error.to_string(), "Cannot continue while program is exited");
}

#[test]
fn test_unresolved_location_display()
{
    let error = DebuggerError::UnresolvedLocation {
        file: "demo.c".to_string(),
        line: 12,
    };
    assert_eq!(error.to_string(), "Could not resolve location demo.c:12");
}

#[test]
fn test_unexpected_eof_display()
{
    let error = DebuggerError::UnexpectedEof { offset: 0x40, needed: 8 };
    let message = error.to_string();
    assert!(message.contains("0x40"));
    assert!(message.contains('8'));
}

#[test]
fn test_unsupported_form_uses_dwarf_name()
{
    let error = DebuggerError::UnsupportedForm(gimli::constants::DW_FORM_exprloc);
    assert!(error.to_string().contains("DW_FORM_exprloc"));
}

#[test]
fn test_io_error_conversion()
{
    let io = std::io::Error::new(std::io::ErrorKind::NotFound, "demo");
    let error: DebuggerError = io.into();
    match error {
        DebuggerError::Io(_) => {
            // Expected: io::Error converts to the Io variant
        }
        _ => panic!("Expected Io variant"),
    }
}

#[cfg(target_os = "linux")]
#[test]
fn test_errno_conversion()
{
    let error: DebuggerError = nix::errno::Errno::ESRCH.into();
    assert!(matches!(error, DebuggerError::Ptrace(nix::errno::Errno::ESRCH)));
    assert!(error.to_string().starts_with("ptrace error"));
}

#[test]
fn test_result_type()
{
    // Test that Result type is properly aliased
    let _result: Result<()> = Ok(());
    let _error_result: Result<()> = Err(DebuggerError::ResourceExhausted("breakpoints".to_string()));
}
