//! Keyhold wire boundary.
//!
//! Request and response shapes for whatever RPC/HTTP layer wraps Keyhold.
//! Binary key material travels as standard padded base64 strings here and
//! nowhere else; everything past this crate works on raw bytes.
//!
//! Decoding only undoes the base64. Length checks belong to `keyhold-core`,
//! so a well-formed base64 string of the wrong size still surfaces as
//! `InvalidKeyMaterial` from the registry rather than as a wire error.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod codec;
pub mod payloads;

pub use codec::{WireError, decode_b64, encode_b64};
pub use payloads::{
    bundle::{
        BundleResponse, PreKeyCountResponse, PreKeyWire, SignedPreKeyWire, SkippedPreKeyWire,
        UpdateSignedPreKeyRequest, UploadBundleRequest, UploadPreKeysRequest, UploadReportResponse,
        decode_pre_keys,
    },
    sender_key::{
        ChannelKeyStatusResponse, InvalidationResponse, MemberKeyStatusWire, SenderKeyResponse,
        SenderKeysResponse, UploadSenderKeyRequest,
    },
};
