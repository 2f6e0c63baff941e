#![no_main]
use libfuzzer_sys::fuzz_target;
use ppm_arith::{compress, decompress_exact, CoderKind, PpmConfig};

fuzz_target!(|data: &[u8]| {
    if data.len() < 2 {
        return;
    }

    // Byte 0: order (1-16), byte 1: coder and arena size
    let order = 1 + u32::from(data[0] % 16);
    let coder = if data[1] & 1 == 0 { CoderKind::Arithmetic } else { CoderKind::Range };
    let memory_limit = (16 * 1024) << ((data[1] >> 1) & 7);

    let input = &data[2..];
    let config = PpmConfig::new(order, memory_limit).with_coder(coder);
    let packed = compress(input, &config).expect("valid config");
    let unpacked = decompress_exact(&packed, &config, input.len()).expect("round trip");
    assert_eq!(unpacked, input);
});
