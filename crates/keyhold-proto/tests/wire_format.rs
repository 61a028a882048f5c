//! JSON shape of the wire payloads.
//!
//! The RPC layer in front of Keyhold speaks JSON; these tests pin field names
//! and defaults so clients do not break silently.

use keyhold_proto::{
    BundleResponse, ChannelKeyStatusResponse, PreKeyWire, SignedPreKeyWire, UploadBundleRequest,
    UploadSenderKeyRequest, encode_b64,
};
use serde_json::json;

#[test]
fn upload_bundle_request_defaults_one_time_prekeys() {
    let value = json!({
        "identity_key": encode_b64(&[1; 32]),
        "registration_id": 1234,
        "signed_pre_key": {
            "key_id": 1,
            "public_key": encode_b64(&[2; 32]),
            "signature": encode_b64(&[3; 64]),
        }
    });

    let request: UploadBundleRequest = serde_json::from_value(value).unwrap();
    assert!(request.one_time_pre_keys.is_empty());
    assert_eq!(request.registration_id, 1234);

    let spk = request.signed_pre_key.decode().unwrap();
    assert_eq!(spk.public_key, vec![2; 32]);
    assert_eq!(spk.signature, vec![3; 64]);
}

#[test]
fn bundle_response_serializes_null_prekey() {
    let response = BundleResponse {
        account_id: 9,
        identity_key: encode_b64(&[1; 32]),
        registration_id: 1,
        signed_pre_key: SignedPreKeyWire {
            key_id: 1,
            public_key: encode_b64(&[2; 32]),
            signature: encode_b64(&[3; 64]),
        },
        one_time_pre_key: None,
    };

    let value = serde_json::to_value(&response).unwrap();
    assert_eq!(value["account_id"], 9);
    assert!(value["one_time_pre_key"].is_null());

    let with_prekey = BundleResponse {
        one_time_pre_key: Some(PreKeyWire { key_id: 5, public_key: encode_b64(&[5; 32]) }),
        ..response
    };
    let value = serde_json::to_value(&with_prekey).unwrap();
    assert_eq!(value["one_time_pre_key"]["key_id"], 5);
}

#[test]
fn sender_key_request_uses_hyphenated_uuid() {
    let value = json!({
        "distribution_id": "00000000-0000-0000-0000-00000000002a",
        "sender_key": encode_b64(b"opaque"),
    });

    let request: UploadSenderKeyRequest = serde_json::from_value(value).unwrap();
    let (distribution_id, blob) = request.decode().unwrap();
    assert_eq!(distribution_id.as_uuid().as_u128(), 42);
    assert_eq!(blob, b"opaque");
}

#[test]
fn channel_status_round_trips() {
    let value = json!({
        "rotation": 3,
        "invalidated_at_secs": 1700,
        "ready": false,
        "members": [
            { "user_id": 1, "role": "Owner", "has_key": true, "iteration": 2, "distribution_id": null },
            { "user_id": 2, "role": "Member", "has_key": false, "iteration": null, "distribution_id": null }
        ]
    });

    let status: ChannelKeyStatusResponse = serde_json::from_value(value.clone()).unwrap();
    assert_eq!(status.members.len(), 2);
    assert_eq!(serde_json::to_value(&status).unwrap(), value);
}
