// Verify the wire format matches what the relay server expects.
// These tests ensure protocol compatibility is never broken.

use serde_json::json;

use switchboard_core::types::SessionKey;
use switchboard_relay::frames::{
    AuthFrame, ChallengePayload, ClientFrame, EnvelopeKind, ReplyFrame, ServerFrame,
    VerifyResponse,
};

#[test]
fn envelope_frame_parses() {
    let json = r#"{"type":"envelope","id":"env-1","user_id":"u1","platform":"wecom","kind":"verify_challenge","payload":{"msg_signature":"s","timestamp":"1","nonce":"n","echostr":"e"}}"#;
    let frame: ServerFrame = serde_json::from_str(json).unwrap();

    let ServerFrame::Envelope(env) = frame else {
        panic!("expected envelope");
    };
    assert_eq!(env.id, "env-1");
    assert_eq!(env.kind, EnvelopeKind::VerifyChallenge);
    let challenge: ChallengePayload = serde_json::from_value(env.payload).unwrap();
    assert_eq!(challenge.echostr, "e");
}

#[test]
fn auth_ok_without_session_id() {
    let frame: ServerFrame = serde_json::from_str(r#"{"type":"auth_ok"}"#).unwrap();
    assert_eq!(frame, ServerFrame::AuthOk { session_id: None });
}

#[test]
fn ping_and_ack_frames() {
    let ping: ServerFrame = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
    assert_eq!(ping, ServerFrame::Ping);

    let ack: ServerFrame = serde_json::from_str(r#"{"type":"ack","id":"r-1"}"#).unwrap();
    assert_eq!(ack, ServerFrame::Ack { id: "r-1".into() });

    let pong = serde_json::to_string(&ClientFrame::Pong).unwrap();
    assert_eq!(pong, r#"{"type":"pong"}"#);
}

#[test]
fn auth_frame_omits_absent_wecom_fields() {
    let auth = ClientFrame::Auth(AuthFrame {
        user_id: "u1".into(),
        platform: "slack".into(),
        ai_provider: "claude".into(),
        ai_model: "claude-sonnet-4-20250514".into(),
        verify_only: false,
        client_version: "0.1.0".into(),
        corp_id: None,
        agent_id: None,
        secret: None,
    });
    let json = serde_json::to_string(&auth).unwrap();

    assert!(json.contains(r#""type":"auth""#));
    assert!(json.contains(r#""verify_only":false"#));
    // wecom fields must be absent for other platforms
    assert!(!json.contains("corp_id"));
    assert!(!json.contains("secret"));
}

#[test]
fn auth_frame_carries_secret_value_on_the_wire() {
    let auth = AuthFrame {
        user_id: "verify-wecom-1".into(),
        platform: "wecom".into(),
        ai_provider: "verify".into(),
        ai_model: "verify".into(),
        verify_only: true,
        client_version: "0.1.0".into(),
        corp_id: Some("ww1".into()),
        agent_id: Some("1000002".into()),
        secret: Some("s3cr3t".into()),
    };
    let json = serde_json::to_value(&auth).unwrap();
    assert_eq!(json["secret"], "s3cr3t");
    // but never in debug output
    assert!(!format!("{auth:?}").contains("s3cr3t"));
}

#[test]
fn reply_frame_serialization() {
    let reply = ClientFrame::Reply(ReplyFrame {
        id: "r-1".into(),
        in_reply_to: None,
        user_id: "u1".into(),
        platform: "slack".into(),
        session_key: SessionKey::for_chat("slack", "U1"),
        payload: json!({"chat_id": "U1", "text": "hi"}),
    });
    let json = serde_json::to_string(&reply).unwrap();

    assert!(json.contains(r#""type":"reply""#));
    assert!(json.contains(r#""session_key":"slack:U1""#));
    assert!(!json.contains("in_reply_to"));
}

#[test]
fn verify_response_shapes() {
    let ok = serde_json::to_string(&ClientFrame::VerifyResponse(VerifyResponse::ok("c1", "123")))
        .unwrap();
    assert!(ok.contains(r#""type":"verify_response""#));
    assert!(ok.contains(r#""plaintext":"123""#));
    // error field must be absent on success
    assert!(!ok.contains(r#""error""#));

    let err = serde_json::to_string(&VerifyResponse::err("c2", "SIGNATURE_MISMATCH", "bad"))
        .unwrap();
    assert!(err.contains(r#""ok":false"#));
    assert!(err.contains(r#""SIGNATURE_MISMATCH""#));
    // plaintext must be absent on error
    assert!(!err.contains("plaintext"));
}

#[test]
fn unknown_frame_type_is_an_error() {
    assert!(serde_json::from_str::<ServerFrame>(r#"{"type":"hello"}"#).is_err());
}
