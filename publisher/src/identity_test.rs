#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use serde_json::{json, Value};

    use common::protocol::upload_fields as fields;
    use common::{AuthResponse, IdentityError, LoginStatus, ManagedPage, Privacy, TransportError, VideoMetadata};

    use crate::app::AppBuilder;
    use crate::config::AppConfig;
    use crate::errors::PublisherError;
    use crate::identity::*;
    use crate::testing::{graph_error_response, MockTransport};
    use crate::transport::{HttpResponse, Method};

    fn identity_config() -> IdentityConfig {
        IdentityConfig {
            app_id: "123456".to_string(),
            graph_url: "https://graph.example.com/".to_string(),
            video_url: "https://graph-video.example.com".to_string(),
            ..IdentityConfig::default()
        }
    }

    fn permissions(granted: &[&str]) -> Value {
        let data: Vec<Value> = DEFAULT_SCOPES
            .iter()
            .map(|scope| {
                let status = if granted.contains(scope) { "granted" } else { "declined" };
                json!({ "permission": scope, "status": status })
            })
            .collect();
        json!({ "id": "1000", "permissions": { "data": data } })
    }

    fn page() -> ManagedPage {
        ManagedPage {
            id: "2000".to_string(),
            name: "Demo Page".to_string(),
            access_token: "page-token".to_string(),
            category: None,
            tasks: Vec::new(),
        }
    }

    fn auth() -> AuthResponse {
        AuthResponse {
            access_token: "user-token".to_string(),
            user_id: "1000".to_string(),
            granted_scopes: Vec::new(),
        }
    }

    #[test]
    fn test_api_version_format() {
        assert!(is_valid_api_version("v18.0"));
        assert!(is_valid_api_version("v2.12"));
        assert!(!is_valid_api_version("18.0"));
        assert!(!is_valid_api_version("v18"));
        assert!(!is_valid_api_version("v18.0.1"));
        assert!(!is_valid_api_version("v.0"));
    }

    #[test]
    fn test_load_builds_session() {
        let client = IdentityClient::new(identity_config(), MockTransport::json(200, json!({})));
        let session = client.load().unwrap();

        assert_eq!(session.app_id, "123456");
        assert_eq!(session.api_version, "v18.0");
        assert_eq!(session.graph_url, "https://graph.example.com");
        assert!(session.cookie);
        assert_eq!(session.scopes.len(), 4);
    }

    #[test]
    fn test_load_rejects_bad_settings() {
        let cases = [
            IdentityConfig { app_id: " ".to_string(), ..identity_config() },
            IdentityConfig { api_version: "latest".to_string(), ..identity_config() },
            IdentityConfig { graph_url: "graph".to_string(), ..identity_config() },
        ];

        for config in cases {
            let client = IdentityClient::new(config, MockTransport::json(200, json!({})));
            assert!(matches!(client.load(), Err(IdentityError::LoadFailed { .. })));
        }
    }

    #[tokio::test]
    async fn test_login_with_all_scopes() {
        let transport = MockTransport::json(200, permissions(&DEFAULT_SCOPES));
        let client = IdentityClient::new(identity_config(), transport.clone());
        let session = client.load().unwrap();

        let auth = client.login(&session, "user-token").await.unwrap();
        assert_eq!(auth.user_id, "1000");
        assert_eq!(auth.access_token, "user-token");
        assert_eq!(auth.granted_scopes.len(), 4);

        let request = transport.last_request();
        assert_eq!(request.method, Method::Get);
        assert_eq!(request.url, "https://graph.example.com/v18.0/me");
        assert_eq!(request.query_value("access_token"), Some("user-token"));
        assert_eq!(request.query_value("fields"), Some("id,permissions"));
    }

    #[tokio::test]
    async fn test_login_missing_scope_is_rejected() {
        let transport = MockTransport::json(200, permissions(&["pages_show_list", "pages_manage_posts"]));
        let client = IdentityClient::new(identity_config(), transport);
        let session = client.load().unwrap();

        match client.login(&session, "user-token").await {
            Err(IdentityError::LoginRejected { missing_scopes }) => {
                assert_eq!(missing_scopes, vec!["pages_read_engagement", "pages_messaging"]);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_login_graph_error() {
        let transport = MockTransport::new(|_| Ok(graph_error_response(400, "Invalid OAuth access token.")));
        let client = IdentityClient::new(identity_config(), transport);
        let session = client.load().unwrap();

        match client.login(&session, "bad").await {
            Err(IdentityError::Graph { message }) => assert_eq!(message, "Invalid OAuth access token."),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_login_status_variants() {
        let session = IdentityClient::new(identity_config(), MockTransport::json(200, json!({})))
            .load()
            .unwrap();

        let connected = IdentityClient::new(identity_config(), MockTransport::json(200, permissions(&DEFAULT_SCOPES)));
        assert!(connected.login_status(&session, "tok").await.is_connected());

        let partial = IdentityClient::new(identity_config(), MockTransport::json(200, permissions(&[])));
        assert_eq!(partial.login_status(&session, "tok").await, LoginStatus::NotAuthorized);

        let expired = IdentityClient::new(
            identity_config(),
            MockTransport::new(|_| Ok(graph_error_response(401, "Session has expired"))),
        );
        assert_eq!(expired.login_status(&session, "tok").await, LoginStatus::NotAuthorized);

        let outage = IdentityClient::new(identity_config(), MockTransport::json(503, json!({})));
        assert_eq!(outage.login_status(&session, "tok").await, LoginStatus::Unknown);

        let offline = IdentityClient::new(identity_config(), MockTransport::failing("no route to host"));
        assert_eq!(offline.login_status(&session, "tok").await, LoginStatus::Unknown);
    }

    #[tokio::test]
    async fn test_user_pages() {
        let transport = MockTransport::json(
            200,
            json!({ "data": [
                { "id": "2000", "name": "Demo Page", "access_token": "page-token", "category": "Media", "tasks": ["CREATE_CONTENT"] },
                { "id": "2001", "name": "Other", "access_token": "other-token" }
            ]}),
        );
        let client = IdentityClient::new(identity_config(), transport.clone());
        let session = client.load().unwrap();

        let pages = client.user_pages(&session, &auth()).await.unwrap();
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].access_token, "page-token");
        assert_eq!(pages[1].tasks, Vec::<String>::new());

        let request = transport.last_request();
        assert_eq!(request.url, "https://graph.example.com/v18.0/me/accounts");
        assert_eq!(request.query_value("access_token"), Some("user-token"));
    }

    #[tokio::test]
    async fn test_user_pages_error_message_fallback() {
        let client = IdentityClient::new(
            identity_config(),
            MockTransport::new(|_| Ok(HttpResponse::new(500, "upstream exploded"))),
        );
        let session = client.load().unwrap();

        match client.user_pages(&session, &auth()).await {
            Err(IdentityError::Graph { message }) => assert_eq!(message, "Failed to fetch pages"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_single_shot_upload() {
        let transport = MockTransport::json(200, json!({ "id": "vid-77" }));
        let client = IdentityClient::new(identity_config(), transport.clone());
        let session = client.load().unwrap();

        let metadata = VideoMetadata::new("Clip")
            .with_description("Short clip")
            .with_privacy(Privacy::AllFriends);
        let request = VideoUploadRequest::new(&page(), "clip.mp4", Bytes::from_static(b"mp4data"), metadata);

        let reply = client.upload_video(&session, request).await.unwrap();
        assert_eq!(reply.id.as_deref(), Some("vid-77"));

        let sent = transport.last_request();
        assert_eq!(sent.method, Method::Post);
        assert_eq!(sent.url, "https://graph-video.example.com/v18.0/2000/videos");
        assert_eq!(sent.query_value("access_token"), Some("page-token"));
        assert_eq!(sent.form_file(fields::SOURCE).map(|b| b.to_vec()), Some(b"mp4data".to_vec()));
        assert_eq!(sent.form_text(fields::TITLE), Some("Clip"));
        assert_eq!(sent.form_text(fields::DESCRIPTION), Some("Short clip"));
        assert_eq!(sent.form_text(fields::PRIVACY), Some(r#"{"value":"ALL_FRIENDS"}"#));
    }

    #[tokio::test]
    async fn test_single_shot_upload_failure() {
        let client = IdentityClient::new(identity_config(), MockTransport::json(413, json!({})));
        let session = client.load().unwrap();
        let request = VideoUploadRequest::new(&page(), "clip.mp4", Bytes::new(), VideoMetadata::new("Clip"));

        match client.upload_video(&session, request).await {
            Err(IdentityError::Graph { message }) => assert_eq!(message, "Upload failed"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_transport_and_decode_failures_surface_as_transport_errors() {
        let offline = IdentityClient::new(identity_config(), MockTransport::failing("no route to host"));
        let session = offline.load().unwrap();

        assert!(matches!(
            offline.login(&session, "tok").await,
            Err(IdentityError::Transport(TransportError::Network { .. }))
        ));
        assert!(matches!(
            offline.user_pages(&session, &auth()).await,
            Err(IdentityError::Transport(TransportError::Network { .. }))
        ));
        let request = VideoUploadRequest::new(&page(), "clip.mp4", Bytes::new(), VideoMetadata::new("Clip"));
        assert!(matches!(
            offline.upload_video(&session, request).await,
            Err(IdentityError::Transport(TransportError::Network { .. }))
        ));

        let garbled = IdentityClient::new(
            identity_config(),
            MockTransport::new(|_| Ok(HttpResponse::new(200, "<html>"))),
        );
        assert!(matches!(
            garbled.login(&session, "tok").await,
            Err(IdentityError::Transport(TransportError::Decode { .. }))
        ));
        assert!(matches!(
            garbled.user_pages(&session, &auth()).await,
            Err(IdentityError::Transport(TransportError::Decode { .. }))
        ));
        let request = VideoUploadRequest::new(&page(), "clip.mp4", Bytes::new(), VideoMetadata::new("Clip"));
        assert!(matches!(
            garbled.upload_video(&session, request).await,
            Err(IdentityError::Transport(TransportError::Decode { .. }))
        ));
    }

    #[tokio::test]
    async fn test_upload_page_id_is_one_path_segment() {
        let transport = MockTransport::json(200, json!({ "id": "vid-1" }));
        let client = IdentityClient::new(identity_config(), transport.clone());
        let session = client.load().unwrap();

        let odd_page = ManagedPage { id: "2000/feed?x".to_string(), ..page() };
        let request = VideoUploadRequest::new(&odd_page, "clip.mp4", Bytes::new(), VideoMetadata::new("Clip"));
        client.upload_video(&session, request).await.unwrap();

        assert_eq!(
            transport.last_request().url,
            "https://graph-video.example.com/v18.0/2000%2Ffeed%3Fx/videos"
        );
    }

    #[tokio::test]
    async fn test_upload_request_from_missing_file() {
        let result = VideoUploadRequest::from_file(&page(), "/definitely/not/here.mp4", VideoMetadata::new("x")).await;
        assert!(matches!(result, Err(IdentityError::Source(_))));
    }

    fn app_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.graph.app_id = "123456".to_string();
        config
    }

    #[tokio::test]
    async fn test_app_requires_loaded_identity() {
        let transport = MockTransport::json(200, permissions(&DEFAULT_SCOPES));
        let app = AppBuilder::new()
            .with_config(app_config())
            .with_transport(transport.clone())
            .with_env_overrides(false)
            .with_logging(false)
            .build()
            .await
            .unwrap();

        assert!(matches!(
            app.login("user-token").await,
            Err(PublisherError::Identity(IdentityError::NotInitialized))
        ));
        assert!(transport.requests().is_empty());

        let first = app.load_identity().await.unwrap();
        let second = app.load_identity().await.unwrap();
        assert_eq!(first, second);

        let auth = app.login("user-token").await.unwrap();
        assert_eq!(auth.user_id, "1000");
        assert!(app.login_status("user-token").await.unwrap().is_connected());
    }

    #[tokio::test]
    async fn test_app_load_fails_without_app_id() {
        let app = AppBuilder::new()
            .with_config(AppConfig::default())
            .with_transport(MockTransport::json(200, json!({})))
            .with_env_overrides(false)
            .with_logging(false)
            .build()
            .await
            .unwrap();

        assert!(matches!(
            app.load_identity().await,
            Err(PublisherError::Identity(IdentityError::LoadFailed { .. }))
        ));
    }
}
