//! Test helpers for executor tests
//!
//! Common utilities for loading scripts and driving VMs

use crate::executor::{drive_forward, Ctx, DriveResult, Script, VM};

/// Parse and validate a JSON script
pub fn script(json: &str) -> Script {
    Script::from_json(json).expect("Script parse failed")
}

/// Script with no functions whose body is a block of the given statements
pub fn body(statements: &str) -> Script {
    script(&format!(
        r#"{{"body": {{"t": "Block", "body": {}}}}}"#,
        statements
    ))
}

/// Fresh VM for the script, driven until it stops
pub fn drive(script: &Script) -> (VM, DriveResult) {
    drive_forward(VM::for_script(script), Ctx::new(script)).expect("drive failed")
}

/// Drive an existing VM
pub fn drive_vm(vm: VM, script: &Script) -> (VM, DriveResult) {
    drive_forward(vm, Ctx::new(script)).expect("drive failed")
}

/// Serialize and deserialize a VM, the way a store would
pub fn roundtrip(vm: &VM) -> VM {
    let json = serde_json::to_string(vm).expect("VM serialization failed");
    serde_json::from_str(&json).expect("VM deserialization failed")
}
