#![no_main]

use libfuzzer_sys::fuzz_target;
use rrdkit::{transform, ModifyRequest, Rrd};

fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }
    let _ = Rrd::from_bytes(data);

    let request = ModifyRequest::from_args(["DEL:a", "DS:fuzz:GAUGE:600:U:U"]);
    if let Ok((rrd, _)) = transform(data, &request) {
        let mut out = Vec::new();
        let _ = rrd.write_to(&mut out);
        let _ = Rrd::from_bytes(&out);
    }
});
