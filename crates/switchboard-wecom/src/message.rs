use std::collections::HashMap;

use quick_xml::events::Event;
use quick_xml::Reader as XmlReader;

use crate::crypto::EncryptedReply;
use crate::error::CryptoError;

/// A decrypted WeCom callback message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeComMessage {
    /// The corp id.
    pub to_user_name: String,
    /// The member who sent the message; replies go back to this user.
    pub from_user_name: String,
    pub create_time: i64,
    pub msg_type: String,
    pub content: Option<String>,
    pub msg_id: Option<String>,
    pub agent_id: Option<String>,
}

impl WeComMessage {
    pub fn parse(xml: &str) -> Result<Self, CryptoError> {
        let mut fields = parse_xml_fields(xml)?;
        let mut required = |name: &str| {
            fields
                .remove(name)
                .ok_or_else(|| CryptoError::Xml(format!("missing <{name}>")))
        };
        let to_user_name = required("ToUserName")?;
        let from_user_name = required("FromUserName")?;
        let msg_type = required("MsgType")?;
        let create_time = fields
            .remove("CreateTime")
            .and_then(|v| v.parse().ok())
            .unwrap_or_default();

        Ok(Self {
            to_user_name,
            from_user_name,
            create_time,
            msg_type,
            content: fields.remove("Content"),
            msg_id: fields.remove("MsgId"),
            agent_id: fields.remove("AgentID"),
        })
    }

    pub fn is_text(&self) -> bool {
        self.msg_type == "text"
    }

    /// The trimmed text content of a non-empty text message.
    pub fn text(&self) -> Option<&str> {
        if !self.is_text() {
            return None;
        }
        self.content
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

/// Pull the `<Encrypt>` field out of an encrypted callback body.
pub fn extract_encrypt(xml: &str) -> Result<String, CryptoError> {
    parse_xml_fields(xml)?
        .remove("Encrypt")
        .ok_or_else(|| CryptoError::Xml("missing <Encrypt>".to_string()))
}

/// Plain text reply addressed from `from` (the corp) to `to` (the member).
pub fn text_reply_xml(to: &str, from: &str, create_time: i64, content: &str) -> String {
    format!(
        "<xml><ToUserName>{}</ToUserName><FromUserName>{}</FromUserName>\
         <CreateTime>{create_time}</CreateTime><MsgType><![CDATA[text]]></MsgType>\
         <Content>{}</Content></xml>",
        cdata(to),
        cdata(from),
        cdata(content),
    )
}

/// Passive-reply envelope around an encrypted payload.
pub fn encrypted_envelope_xml(reply: &EncryptedReply) -> String {
    format!(
        "<xml><Encrypt>{}</Encrypt><MsgSignature>{}</MsgSignature>\
         <TimeStamp>{}</TimeStamp><Nonce>{}</Nonce></xml>",
        cdata(&reply.encrypt),
        cdata(&reply.msg_signature),
        reply.timestamp,
        cdata(&reply.nonce),
    )
}

fn cdata(s: &str) -> String {
    format!("<![CDATA[{}]]>", s.replace("]]>", "]]]]><![CDATA[>"))
}

/// Flatten a WeCom `<xml>` document into `tag -> text`.
///
/// WeCom bodies are one level deep, so nesting is ignored.
pub fn parse_xml_fields(xml: &str) -> Result<HashMap<String, String>, CryptoError> {
    let mut reader = XmlReader::from_str(xml);
    reader.trim_text(true);
    let mut buffer = Vec::new();
    let mut current_tag: Option<String> = None;
    let mut output: HashMap<String, String> = HashMap::new();

    loop {
        match reader.read_event_into(&mut buffer) {
            Ok(Event::Start(event)) => {
                current_tag =
                    Some(String::from_utf8_lossy(event.local_name().as_ref()).to_string());
            }
            Ok(Event::Text(event)) => {
                if let Some(tag) = current_tag.as_ref() {
                    let text = event
                        .unescape()
                        .map_err(|e| CryptoError::Xml(e.to_string()))?;
                    output.entry(tag.clone()).or_default().push_str(&text);
                }
            }
            Ok(Event::CData(event)) => {
                // Split CDATA sections arrive as consecutive events.
                if let Some(tag) = current_tag.as_ref() {
                    let text = String::from_utf8_lossy(event.as_ref());
                    output.entry(tag.clone()).or_default().push_str(&text);
                }
            }
            Ok(Event::End(_)) => {
                current_tag = None;
            }
            Ok(Event::Eof) => break,
            Err(err) => return Err(CryptoError::Xml(err.to_string())),
            _ => {}
        }
        buffer.clear();
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEXT_MSG: &str = "<xml><ToUserName><![CDATA[ww5823bf96d3bd56c7]]></ToUserName>\
        <FromUserName><![CDATA[zhangsan]]></FromUserName><CreateTime>1348831860</CreateTime>\
        <MsgType><![CDATA[text]]></MsgType><Content><![CDATA[你好 <b>]]></Content>\
        <MsgId>1234567890123456</MsgId><AgentID>1000002</AgentID></xml>";

    #[test]
    fn parses_text_message() {
        let msg = WeComMessage::parse(TEXT_MSG).unwrap();
        assert_eq!(msg.from_user_name, "zhangsan");
        assert_eq!(msg.create_time, 1348831860);
        assert_eq!(msg.text(), Some("你好 <b>"));
        assert_eq!(msg.msg_id.as_deref(), Some("1234567890123456"));
        assert_eq!(msg.agent_id.as_deref(), Some("1000002"));
    }

    #[test]
    fn event_messages_have_no_text() {
        let xml = "<xml><ToUserName>ww1</ToUserName><FromUserName>u</FromUserName>\
            <MsgType><![CDATA[event]]></MsgType><Event>enter_agent</Event></xml>";
        let msg = WeComMessage::parse(xml).unwrap();
        assert!(!msg.is_text());
        assert_eq!(msg.text(), None);
    }

    #[test]
    fn missing_required_field_is_an_error() {
        let err = WeComMessage::parse("<xml><MsgType>text</MsgType></xml>").unwrap_err();
        assert_eq!(err.code(), "MALFORMED_XML");
    }

    #[test]
    fn reply_content_with_cdata_terminator_survives() {
        let xml = text_reply_xml("zhangsan", "ww1", 1, "a]]>b");
        let fields = parse_xml_fields(&xml).unwrap();
        assert_eq!(fields["Content"], "a]]>b");
        assert_eq!(fields["MsgType"], "text");
    }

    #[test]
    fn envelope_exposes_encrypt_field() {
        let reply = EncryptedReply {
            encrypt: "abc+/=".into(),
            msg_signature: "sig".into(),
            timestamp: "1409659589".into(),
            nonce: "263014780".into(),
        };
        let xml = encrypted_envelope_xml(&reply);
        assert_eq!(extract_encrypt(&xml).unwrap(), "abc+/=");
        assert_eq!(parse_xml_fields(&xml).unwrap()["TimeStamp"], "1409659589");
    }
}
