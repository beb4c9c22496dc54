//! Link token properties over the public API.

use proptest::prelude::*;
use streamgate::{decode, encode, LinkTarget};

#[test]
fn known_coordinates_round_trip() {
    let target = LinkTarget {
        msg_id: 4242,
        chat_id: "2318728082".to_string(),
    };
    let token = encode(&target);
    assert_eq!(decode(&token).unwrap(), target);
}

#[test]
fn tokens_survive_url_embedding() {
    let token = encode(&LinkTarget {
        msg_id: 1,
        chat_id: "1".to_string(),
    });
    let url = format!("https://dl.example.com/dl/{token}/file.bin");
    // Nothing in the token needs percent-encoding.
    assert_eq!(url, url.replace('%', ""));
    assert!(token.bytes().all(|b| b.is_ascii_alphanumeric()));
}

#[test]
fn bad_tokens_are_rejected() {
    assert!(decode("!!!not-base62!!!").is_err());
    assert!(decode("0").is_err());
    assert!(decode("deadbeef").is_err());
}

proptest! {
    #[test]
    fn any_target_round_trips(msg_id in 1i64..=i64::MAX, chat_id in "[0-9]{1,13}") {
        let target = LinkTarget { msg_id, chat_id };
        let token = encode(&target);
        prop_assert!(token.bytes().all(|b| b.is_ascii_alphanumeric()));
        prop_assert_eq!(decode(&token).unwrap(), target);
    }
}
