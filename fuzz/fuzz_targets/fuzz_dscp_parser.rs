#![no_main]

use libfuzzer_sys::fuzz_target;

use domain::dscp::entity::IpFamily;
use domain::dscp::parser::{ETH_HLEN, HeaderView, TrafficClassField};

// Arbitrary bytes parsed as both families. A successful parse must point
// inside the buffer and agree with the family it was asked for.
fuzz_target!(|data: &[u8]| {
    for family in [IpFamily::V4, IpFamily::V6] {
        let Ok(view) = HeaderView::parse(data, family, 1) else {
            continue;
        };
        assert_eq!(view.family, family);
        assert_eq!(view.key.if_index, 1);
        match view.field {
            TrafficClassField::Ipv4 {
                tos_offset,
                checksum_offset,
                tos,
            } => {
                assert_eq!(family, IpFamily::V4);
                assert!(checksum_offset + 2 <= data.len());
                assert_eq!(data[tos_offset], tos);
                assert!(view.key.src_ip.to_ipv4_mapped().is_some());
            }
            TrafficClassField::Ipv6 {
                word_offset,
                first_word,
            } => {
                assert_eq!(family, IpFamily::V6);
                assert_eq!(word_offset, ETH_HLEN);
                assert_eq!(first_word >> 28, 6);
            }
        }
    }
});
