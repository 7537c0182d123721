// CLASSIFICATION: COMMUNITY
// Filename: kexec_gate.rs v0.1
// Date Modified: 2026-04-03
// Author: Cohesix Codex

use serial_test::serial;

use homegw_init::reboot::kexec_gate;

#[tokio::test]
#[serial]
async fn second_caller_is_rejected_while_held() {
    let held = kexec_gate().try_lock_owned().unwrap();
    assert!(kexec_gate().try_lock_owned().is_err());
    drop(held);
    assert!(kexec_gate().try_lock_owned().is_ok());
}

#[tokio::test]
#[serial]
async fn gate_is_released_on_drop() {
    {
        let _held = kexec_gate().try_lock_owned().unwrap();
    }
    let reacquired = kexec_gate().try_lock_owned();
    assert!(reacquired.is_ok());
}
