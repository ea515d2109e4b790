//! Property tests for switch port identifiers

use linkwatch_core::models::PortId;
use proptest::prelude::*;

fn port_strategy() -> impl Strategy<Value = PortId> {
    (any::<u16>(), any::<u16>(), proptest::option::of(any::<u16>())).prop_map(
        |(slot, port, subport)| match subport {
            Some(sub) => PortId::split(slot, port, sub),
            None => PortId::new(slot, port),
        },
    )
}

proptest! {
    /// Property: Display output parses back to the same port
    #[test]
    fn display_parses_back(port in port_strategy()) {
        let text = port.to_string();
        prop_assert_eq!(text.parse::<PortId>(), Ok(port));
    }

    /// Property: strings without a slash separator are rejected
    #[test]
    fn missing_separator_is_rejected(digits in "[0-9]{1,8}") {
        prop_assert!(digits.parse::<PortId>().is_err());
    }

    /// Property: ordering follows slot, then port
    #[test]
    fn ordering_is_slot_major(a in port_strategy(), b in port_strategy()) {
        if a.slot != b.slot {
            prop_assert_eq!(a < b, a.slot < b.slot);
        } else if a.port != b.port {
            prop_assert_eq!(a < b, a.port < b.port);
        }
    }
}
