#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use serde_json::json;

    use crate::transport::*;
    use common::RequestFailure;

    #[test]
    fn test_fields_switch_body_to_multipart() {
        let request = HttpRequest::post("http://localhost/videos")
            .text_field("upload_phase", "transfer")
            .file_field("video_file_chunk", "chunk", "application/octet-stream", Bytes::from_static(b"abc"))
            .header("X-Trace", "1")
            .query("access_token", "tok");

        assert_eq!(request.form_text("upload_phase"), Some("transfer"));
        assert_eq!(request.form_file("video_file_chunk").map(|b| b.len()), Some(3));
        assert_eq!(request.form_text("video_file_chunk"), None);
        assert_eq!(request.header_value("x-trace"), Some("1"));
        assert_eq!(request.query_value("access_token"), Some("tok"));
    }

    #[test]
    fn test_json_body_has_no_form_fields() {
        let request = HttpRequest::put("http://localhost/streams/cam").json(json!({ "title": "Cam" }));
        assert_eq!(request.form_text("title"), None);
        assert!(matches!(request.body, RequestBody::Json(_)));
    }

    #[test]
    fn test_error_for_status_prefers_graph_message() {
        let response = HttpResponse::json_value(
            400,
            &json!({ "error": { "message": "Invalid OAuth access token.", "type": "OAuthException", "code": 190 } }),
        );

        match response.error_for_status() {
            Err(RequestFailure::Status { code, message }) => {
                assert_eq!(code, 400);
                assert_eq!(message, "Invalid OAuth access token.");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_error_for_status_truncates_plain_bodies() {
        let body = "x".repeat(2048);
        let failure = HttpResponse::new(502, body).error_for_status().unwrap_err();

        match failure {
            RequestFailure::Status { code, message } => {
                assert_eq!(code, 502);
                assert_eq!(message.len(), 512);
            }
            other => panic!("unexpected failure: {:?}", other),
        }
    }

    #[test]
    fn test_success_passes_through() {
        let response = HttpResponse::new(204, "").error_for_status().unwrap();
        assert!(response.is_success());
        assert_eq!(response.json_or_null().unwrap(), serde_json::Value::Null);
    }

    #[test]
    fn test_decode_error() {
        let response = HttpResponse::new(200, "not json");
        let result: Result<serde_json::Value, _> = response.json();
        assert!(matches!(result, Err(common::TransportError::Decode { .. })));
    }

    #[test]
    fn test_join_path_encodes_each_segment() {
        assert_eq!(join_path("https://graph.example.com", &["v18.0", "me"]).unwrap(), "https://graph.example.com/v18.0/me");
        assert_eq!(join_path("http://host/prefix/", &["a b", "c/d"]).unwrap(), "http://host/prefix/a%20b/c%2Fd");
        assert_eq!(join_path("http://host:8080", &[]).unwrap(), "http://host:8080/");

        for base in ["no scheme", "mailto:someone@example.com"] {
            assert!(matches!(
                join_path(base, &["x"]),
                Err(common::TransportError::InvalidRequest { .. })
            ));
        }
    }

    #[test]
    fn test_reqwest_transport_builds_with_defaults() {
        let transport = ReqwestTransport::new(&TransportOptions::default());
        assert!(transport.is_ok());
    }
}
