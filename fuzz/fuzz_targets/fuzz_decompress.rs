#![no_main]
use libfuzzer_sys::fuzz_target;
use ppm_arith::{decompress, CoderKind, PpmConfig};

fuzz_target!(|data: &[u8]| {
    if data.len() < 2 {
        return;
    }

    // Byte 0: order (1-8), byte 1: coder
    let order = 1 + u32::from(data[0] % 8);
    let coder = if data[1] & 1 == 0 { CoderKind::Arithmetic } else { CoderKind::Range };

    let config = PpmConfig::new(order, 64 * 1024)
        .with_coder(coder)
        .with_max_output(1 << 20);
    let _ = decompress(&data[2..], &config);
});
