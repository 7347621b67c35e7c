use arkiv_location::{ARCHIVE_PROTOCOL, Location, QUERY_PROTOCOL};
use proptest::prelude::*;

fn segment() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9 %:#?._~+-]{1,8}"
}

fn path(max: usize) -> impl Strategy<Value = String> {
    prop::collection::vec(segment(), 0..max).prop_map(|parts| parts.join("/"))
}

fn payload_protocol() -> impl Strategy<Value = &'static str> {
    prop_oneof![Just(ARCHIVE_PROTOCOL), Just(QUERY_PROTOCOL), Just("stream")]
}

fn location() -> impl Strategy<Value = Location> {
    (
        prop_oneof![Just("file"), Just("smb"), Just("sftp")],
        path(5),
        prop::collection::vec((payload_protocol(), path(4)), 0..4),
    )
        .prop_map(|(protocol, base, payloads)| {
            let mut location = Location::from_url(&format!("{protocol}:///")).unwrap();
            location = location.join(&base);
            for (proto, sub) in payloads {
                location = location.with_payload(proto, &sub).unwrap();
            }
            location
        })
}

proptest! {
    #[test]
    fn url_round_trip(location in location()) {
        let parsed = Location::from_url(&location.as_url()).unwrap();
        prop_assert_eq!(parsed, location);
    }

    #[test]
    fn ancestry_terminates_at_root(location in location()) {
        let chain = location.ancestry();
        prop_assert!(!chain.is_empty());
        prop_assert_eq!(&chain[0].parent(), &chain[0]);
        prop_assert_eq!(chain.last().unwrap(), &location);
        for pair in chain.windows(2) {
            prop_assert_eq!(&pair[1].parent(), &pair[0]);
        }
    }

    #[test]
    fn origin_strips_exactly_one_payload(location in location()) {
        match location.origin() {
            Some(origin) => {
                prop_assert_eq!(origin.payloads().len(), location.payloads().len() - 1);
                prop_assert_eq!(origin.protocol(), location.protocol());
                prop_assert_eq!(origin.base_path(), location.base_path());
                prop_assert_eq!(origin.payloads(), &location.payloads()[..origin.payloads().len()]);
            }
            None => prop_assert!(!location.has_payload()),
        }
    }

    #[test]
    fn archive_root_is_stable(location in location()) {
        if let Some(root) = location.archive_root() {
            prop_assert_eq!(root.archive_root().unwrap(), root.clone());
            prop_assert!(root.innermost().unwrap().is_root());
            prop_assert_eq!(root.origin(), location.origin());
        }
    }
}
