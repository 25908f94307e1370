// SPDX-License-Identifier: PMPL-1.0-or-later
// Fuzz target for producer update parsing and validation

#![no_main]

use libfuzzer_sys::fuzz_target;
use profsync_profile::ProposedUpdate;

fuzz_target!(|data: &[u8]| {
    let Ok(update) = serde_json::from_slice::<ProposedUpdate>(data) else {
        return;
    };

    // Neither check may panic, whatever the payload.
    let valid = update.validate().is_ok();
    let mapped = update.check_schema();

    if valid {
        if let Ok(spec) = mapped {
            assert_eq!(spec.name, update.field);
            assert!(spec.check(&update.value).is_ok());
        }
    }
});
