//! XML-RPC encoding for scalar calls and responses, read with `quick-xml`.

use super::RpcValue;
use crate::error::RpcError;
use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

pub(crate) fn encode_call(method: &str, args: &[RpcValue]) -> String {
    let mut out = String::from("<?xml version=\"1.0\"?>\n<methodCall><methodName>");
    out.push_str(&escape(method));
    out.push_str("</methodName><params>");
    for arg in args {
        out.push_str("<param><value>");
        match arg {
            RpcValue::Str(s) => {
                out.push_str("<string>");
                out.push_str(&escape(s));
                out.push_str("</string>");
            }
            RpcValue::Int(n) => {
                out.push_str(&format!("<i4>{n}</i4>"));
            }
        }
        out.push_str("</value></param>");
    }
    out.push_str("</params></methodCall>\n");
    out
}

/// Decode a `methodResponse`, rendering the first scalar parameter as a string.
pub(crate) fn decode_response(body: &str) -> Result<String, RpcError> {
    let document = parse_document(body)?;
    let response = document
        .child("methodResponse")
        .ok_or_else(|| RpcError::Malformed("not a methodResponse".into()))?;
    if let Some(fault) = response.child("fault") {
        return Err(decode_fault(fault));
    }
    let params = response
        .child("params")
        .ok_or_else(|| RpcError::Malformed("response has neither params nor fault".into()))?;
    let value = params
        .child("param")
        .and_then(|p| p.child("value"))
        .ok_or_else(|| RpcError::Malformed("response carries no value".into()))?;
    scalar(value)
}

/// Element tree of a response body. Only element names, children and text survive.
#[derive(Debug, Default)]
struct Element {
    name: String,
    children: Vec<Element>,
    text: String,
}

impl Element {
    fn named(name: String) -> Self {
        Self {
            name,
            ..Self::default()
        }
    }

    fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }
}

fn malformed(e: impl std::fmt::Display) -> RpcError {
    RpcError::Malformed(e.to_string())
}

fn element_name(start: &BytesStart<'_>) -> Result<String, RpcError> {
    std::str::from_utf8(start.local_name().as_ref())
        .map(str::to_string)
        .map_err(malformed)
}

fn parse_document(body: &str) -> Result<Element, RpcError> {
    let mut reader = Reader::from_str(body);
    let mut stack = vec![Element::default()];
    loop {
        match reader.read_event().map_err(malformed)? {
            Event::Start(start) => stack.push(Element::named(element_name(&start)?)),
            Event::Empty(start) => {
                let element = Element::named(element_name(&start)?);
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(element);
                }
            }
            Event::End(_) => {
                let element = stack
                    .pop()
                    .filter(|_| !stack.is_empty())
                    .ok_or_else(|| malformed("unbalanced closing tag"))?;
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(element);
                }
            }
            Event::Text(text) => {
                let text = text.unescape().map_err(malformed)?;
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&text);
                }
            }
            Event::CData(data) => {
                let text = std::str::from_utf8(&data).map_err(malformed)?;
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(text);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    match (stack.pop(), stack.is_empty()) {
        (Some(document), true) => Ok(document),
        _ => Err(malformed("unclosed element")),
    }
}

fn decode_fault(fault: &Element) -> RpcError {
    let members: Vec<&Element> = fault
        .child("value")
        .and_then(|v| v.child("struct"))
        .map(|s| s.children.iter().filter(|m| m.name == "member").collect())
        .unwrap_or_default();
    let member = |name: &str| -> Option<String> {
        let found = members
            .iter()
            .find(|m| m.child("name").is_some_and(|n| n.text.trim() == name))?;
        scalar(found.child("value")?).ok()
    };
    RpcError::Fault {
        code: member("faultCode")
            .and_then(|c| c.trim().parse().ok())
            .unwrap_or(0),
        message: member("faultString").unwrap_or_default(),
    }
}

fn scalar(value: &Element) -> Result<String, RpcError> {
    let Some(typed) = value.children.first() else {
        return Ok(value.text.clone());
    };
    match typed.name.as_str() {
        "string" => Ok(typed.text.clone()),
        "i4" | "i8" | "int" | "double" => Ok(typed.text.trim().to_string()),
        "boolean" => match typed.text.trim() {
            "1" => Ok("true".into()),
            "0" => Ok("false".into()),
            other => Err(RpcError::Malformed(format!("bad boolean {other:?}"))),
        },
        other => Err(RpcError::Malformed(format!("unsupported value type <{other}>"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_escapes_configuration_text() {
        let xml = encode_call(
            "daq.init",
            &[RpcValue::Str("a: \"<b>\" & c".into())],
        );
        assert!(xml.contains("<methodName>daq.init</methodName>"));
        assert!(xml.contains("<string>a: &quot;&lt;b&gt;&quot; &amp; c</string>"));
    }

    #[test]
    fn call_encodes_integers_and_no_args() {
        let xml = encode_call("daq.start", &[RpcValue::Int(101)]);
        assert!(xml.contains("<value><i4>101</i4></value>"));
        let xml = encode_call("daq.stop", &[]);
        assert!(xml.contains("<params></params>"));
    }

    #[test]
    fn decodes_typed_and_untyped_values() {
        let typed = "<?xml version=\"1.0\"?><methodResponse><params><param>\
                     <value><string>Success &amp; done</string></value></param></params></methodResponse>";
        assert_eq!(decode_response(typed).unwrap(), "Success & done");

        let int = "<methodResponse><params><param><value><i4>4200</i4></value></param></params></methodResponse>";
        assert_eq!(decode_response(int).unwrap(), "4200");

        let untyped = "<methodResponse><params><param><value>busy</value></param></params></methodResponse>";
        assert_eq!(decode_response(untyped).unwrap(), "busy");

        let boolean = "<methodResponse><params><param><value><boolean>1</boolean></value></param></params></methodResponse>";
        assert_eq!(decode_response(boolean).unwrap(), "true");

        let empty = "<methodResponse><params><param><value><string/></value></param></params></methodResponse>";
        assert_eq!(decode_response(empty).unwrap(), "");
    }

    #[test]
    fn decodes_faults() {
        let body = "<methodResponse><fault><value><struct>\
                    <member><name>faultCode</name><value><int>-3</int></value></member>\
                    <member><name>faultString</name><value><string>not in ready state</string></value></member>\
                    </struct></value></fault></methodResponse>";
        match decode_response(body).unwrap_err() {
            RpcError::Fault { code, message } => {
                assert_eq!(code, -3);
                assert_eq!(message, "not in ready state");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn decodes_character_references_and_cdata() {
        let refs = "<methodResponse><params><param><value>\
                    <string>ready&#10;line2 &#60;ok&#x3E;</string></value></param></params></methodResponse>";
        assert_eq!(decode_response(refs).unwrap(), "ready\nline2 <ok>");

        let cdata = "<methodResponse><params><param><value>\
                     <string><![CDATA[a<b]]></string></value></param></params></methodResponse>";
        assert_eq!(decode_response(cdata).unwrap(), "a<b");
    }

    #[test]
    fn tolerates_whitespace_inside_tags_and_between_elements() {
        let body = "<?xml version=\"1.0\"?>\n<methodResponse >\n  <params>\n    <param>\n      \
                    <value ><string >Success</string ></value>\n    </param>\n  </params>\n</methodResponse>\n";
        assert_eq!(decode_response(body).unwrap(), "Success");
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            decode_response("<html>oops</html>"),
            Err(RpcError::Malformed(_))
        ));
        let nested = "<methodResponse><params><param><value><array><data></data></array></value></param></params></methodResponse>";
        assert!(matches!(decode_response(nested), Err(RpcError::Malformed(_))));
        let mismatched = "<methodResponse><params></param></methodResponse>";
        assert!(matches!(decode_response(mismatched), Err(RpcError::Malformed(_))));
        let truncated = "<methodResponse><params><param><value><string>ok";
        assert!(matches!(decode_response(truncated), Err(RpcError::Malformed(_))));
    }
}
