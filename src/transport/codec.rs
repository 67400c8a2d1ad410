//! NDJSON codec for message serialization
//!
//! Shared encoding/decoding for the line-delimited JSON protocol spoken
//! between the service, render clients, and the buttons surface.

use crate::protocol::{Request, Response};
use crate::socket::SocketError;

/// Encode a request into NDJSON format (JSON + newline)
pub fn encode_request(request: &Request) -> Result<String, SocketError> {
    let mut json = serde_json::to_string(request)?;
    json.push('\n');
    Ok(json)
}

/// Encode a response into NDJSON format
pub fn encode_response(response: &Response) -> Result<String, SocketError> {
    let mut json = serde_json::to_string(response)?;
    json.push('\n');
    Ok(json)
}

/// Decode a line of JSON into a Request
pub fn decode_request(line: &str) -> Result<Request, SocketError> {
    let request: Request = serde_json::from_str(line.trim())?;
    Ok(request)
}

/// Decode a line of JSON into a Response
pub fn decode_response(line: &str) -> Result<Response, SocketError> {
    let response: Response = serde_json::from_str(line.trim())?;
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{cmd, status};

    #[test]
    fn test_encode_request() {
        let request = Request::new(cmd::WIDGETS);
        let encoded = encode_request(&request).unwrap();
        assert!(encoded.ends_with('\n'));
        assert!(encoded.contains("\"cmd\":\"widgets\""));
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let request = Request::with_data(
            cmd::ACTIVATE_FILE,
            serde_json::json!({"filename": "widgets_night.json"}),
        );
        let encoded = encode_request(&request).unwrap();

        let decoded = decode_request(encoded.trim_end()).unwrap();
        assert_eq!(decoded.cmd, cmd::ACTIVATE_FILE);
        assert_eq!(
            decoded.data.unwrap()["filename"],
            "widgets_night.json"
        );
    }

    #[test]
    fn test_response_roundtrip() {
        let response = Response::ok(cmd::SENSOR_DATA, serde_json::json!({"sensors": {}}));
        let encoded = encode_response(&response).unwrap();

        let decoded = decode_response(encoded.trim()).unwrap();
        assert_eq!(decoded.result, status::OK);
        assert_eq!(decoded.cmd, cmd::SENSOR_DATA);
    }
}
