#![no_main]

use libfuzzer_sys::fuzz_target;
use rrdkit::dsdef::ColumnSpec;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(spec) = ColumnSpec::parse(text) {
        let _ = spec.to_ds_def();
        let _ = ColumnSpec::parse(&spec.to_string());
    }
});
