//! Property tests for the compression drivers.

use ppm_arith::{compress, decompress, decompress_exact, CoderKind, PpmConfig};
use proptest::prelude::*;

fn coder() -> impl Strategy<Value = CoderKind> {
    prop_oneof![Just(CoderKind::Arithmetic), Just(CoderKind::Range)]
}

/// Bytes drawn from a small alphabet so contexts repeat.
fn text() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(prop::sample::select(b"abcde \n".to_vec()), 0..2000)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn arbitrary_bytes_round_trip(
        data in prop::collection::vec(any::<u8>(), 0..1500),
        order in 1u32..8,
        coder in coder(),
    ) {
        let config = PpmConfig::new(order, 1 << 20).with_coder(coder);
        let packed = compress(&data, &config).unwrap();
        prop_assert_eq!(decompress(&packed, &config).unwrap(), data);
    }

    #[test]
    fn small_alphabet_round_trip(data in text(), order in 1u32..12, coder in coder()) {
        let config = PpmConfig::new(order, 1 << 20).with_coder(coder);
        let packed = compress(&data, &config).unwrap();
        prop_assert_eq!(decompress_exact(&packed, &config, data.len()).unwrap(), data);
    }

    #[test]
    fn tight_arena_round_trip(
        data in prop::collection::vec(any::<u8>(), 2000..6000),
        order in 2u32..6,
    ) {
        let config = PpmConfig::new(order, 16 * 1024);
        let packed = compress(&data, &config).unwrap();
        prop_assert_eq!(decompress(&packed, &config).unwrap(), data);
    }

    #[test]
    fn compression_is_deterministic(data in text(), coder in coder()) {
        let config = PpmConfig::new(4, 1 << 20).with_coder(coder);
        prop_assert_eq!(compress(&data, &config).unwrap(), compress(&data, &config).unwrap());
    }
}
