//! Error enum behavior and `Result` plumbing through the public surface.

use std::sync::PoisonError;
use threefd_gc::{Error, GC, Gc, Result};

#[test_log::test]
fn allocation_failure_display() {
    let error = Error::AllocationFailure { size: 64 };
    assert_eq!(error.to_string(), "allocation failed for 64 bytes");
}

#[test_log::test]
fn invariant_violation_display_carries_its_message() {
    let error = Error::InvariantViolation("slot not found".to_owned());
    assert_eq!(error.to_string(), "invariant violation: slot not found");
}

#[test_log::test]
fn free_callback_panicked_display_carries_its_message() {
    let error = Error::FreeCallbackPanicked("boom".to_owned());
    assert_eq!(error.to_string(), "free callback panicked: boom");
}

#[test_log::test]
fn worker_fatal_display_carries_its_message() {
    let error = Error::WorkerFatal("disk full".to_owned());
    assert_eq!(error.to_string(), "worker thread failed: disk full");
}

#[test_log::test]
fn use_after_shutdown_display() {
    assert_eq!(Error::UseAfterShutdown.to_string(), "operation attempted after collector shutdown");
}

#[test_log::test]
fn lock_and_sync_error_display_carry_their_message() {
    assert_eq!(
        Error::LockError("poisoned".to_owned()).to_string(),
        "failed to acquire lock: poisoned"
    );
    assert_eq!(
        Error::SyncError("join failed".to_owned()).to_string(),
        "thread synchronization error: join failed"
    );
}

#[test_log::test]
fn debug_formatting_names_the_variant() {
    let error = Error::InvariantViolation("x".to_owned());
    let debug = format!("{error:?}");
    assert!(debug.contains("InvariantViolation"));
    assert!(debug.contains('x'));
}

#[test_log::test]
fn poison_error_converts_to_lock_error() {
    let poisoned: PoisonError<()> = PoisonError::new(());
    let error: Error = poisoned.into();
    assert!(matches!(error, Error::LockError(_)));
}

#[test_log::test]
fn ordinary_allocation_and_statistics_both_succeed() -> Result<()> {
    let _gc = Gc::try_new(7_u32)?;
    let _stats = GC.statistics()?;
    Ok(())
}

#[test_log::test]
fn try_new_succeeds_for_an_ordinary_small_value() -> Result<()> {
    let gc = Gc::try_new("fits easily".to_owned())?;
    assert_eq!(*gc, "fits easily");
    Ok(())
}
