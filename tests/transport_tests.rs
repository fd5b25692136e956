//! Integration tests for the Kerberos transport against a mock WinRM listener.

mod common;

use common::*;
use wiremock::matchers::{body_string, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use winrm_krb5::connection::{
    Endpoint, KerberosTransport, SoapMessage, TransportError, Transporter,
};

const REQUEST: &str = "<s:Envelope>request</s:Envelope>";
const RESPONSE: &str = "<s:Envelope>response</s:Envelope>";

fn request() -> SoapMessage {
    SoapMessage::new(REQUEST)
}

// ============================================================================
// Successful exchanges
// ============================================================================

#[tokio::test]
async fn test_post_returns_body_on_success() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/wsman"))
        .and(header("Content-Type", "application/soap+xml;charset=UTF-8"))
        .and(body_string(REQUEST))
        .respond_with(soap_ok(RESPONSE))
        .expect(1)
        .mount(&server)
        .await;

    let negotiator = StaticNegotiator::new(b"token");
    let transport = transport_for(&server, negotiator.clone());

    let body = transport.post(&request()).await.unwrap();
    assert_eq!(body, RESPONSE);
    // No challenge, no token.
    assert_eq!(negotiator.calls(), 0);
}

#[tokio::test]
async fn test_content_type_parameters_are_accepted() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(RESPONSE, "application/soap+xml"))
        .mount(&server)
        .await;

    let transport = transport_for(&server, StaticNegotiator::new(b"token"));
    assert_eq!(transport.post(&request()).await.unwrap(), RESPONSE);
}

#[tokio::test]
async fn test_endpoint_url_names_the_mock_server() {
    let server = MockServer::start().await;
    let transport = transport_for(&server, StaticNegotiator::new(b"token"));

    let expected = format!("{}/wsman", server.uri());
    assert_eq!(transport.endpoint_url(), Some(expected));
}

// ============================================================================
// Response validation
// ============================================================================

#[tokio::test]
async fn test_http_error_truncates_body_in_message() {
    let server = MockServer::start().await;
    let body = format!("{}{}", "x".repeat(100), "y".repeat(50));
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_raw(body.clone(), "text/plain"))
        .mount(&server)
        .await;

    let transport = transport_for(&server, StaticNegotiator::new(b"token"));
    let err = transport.post(&request()).await.unwrap_err();

    assert_eq!(err.status(), Some(500));
    assert_eq!(err.body(), Some(body.as_str()));
    assert_eq!(
        err.to_string(),
        format!("http error 500: {}...", "x".repeat(100))
    );
}

#[tokio::test]
async fn test_http_error_with_empty_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let transport = transport_for(&server, StaticNegotiator::new(b"token"));
    let err = transport.post(&request()).await.unwrap_err();

    assert_eq!(err.to_string(), "http error 500: <no http content>");
}

#[tokio::test]
async fn test_wrong_content_type_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("hello", "text/plain"))
        .mount(&server)
        .await;

    let transport = transport_for(&server, StaticNegotiator::new(b"token"));
    let err = transport.post(&request()).await.unwrap_err();

    match &err {
        TransportError::ContentType { content_type, body } => {
            assert_eq!(content_type, "text/plain");
            assert_eq!(body, "hello");
        }
        other => panic!("expected ContentType error, got {:?}", other),
    }
    assert_eq!(
        err.to_string(),
        "incorrect Content-Type \"text/plain\" (expected application/soap+xml): hello"
    );
}

// ============================================================================
// Negotiate handshake
// ============================================================================

/// Mount a listener that demands Negotiate and accepts the token `token`.
async fn mount_negotiate(server: &MockServer, authorized: ResponseTemplate) {
    Mock::given(method("POST"))
        .and(header("Authorization", "Negotiate dG9rZW4="))
        .respond_with(authorized)
        .with_priority(1)
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).insert_header("WWW-Authenticate", "Negotiate"))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_negotiate_challenge_is_answered() {
    let server = MockServer::start().await;
    mount_negotiate(&server, soap_ok(RESPONSE)).await;

    let negotiator = StaticNegotiator::new(b"token");
    let transport = transport_for(&server, negotiator.clone());

    let body = transport.post(&request()).await.unwrap();
    assert_eq!(body, RESPONSE);
    assert_eq!(negotiator.calls(), 1);
    assert_eq!(negotiator.hosts(), vec!["127.0.0.1".to_string()]);
}

#[tokio::test]
async fn test_authorized_retry_resends_the_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(header("Authorization", "Negotiate dG9rZW4="))
        .and(body_string(REQUEST))
        .respond_with(soap_ok(RESPONSE))
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).insert_header("WWW-Authenticate", "Negotiate"))
        .expect(1)
        .mount(&server)
        .await;

    let transport = transport_for(&server, StaticNegotiator::new(b"token"));
    transport.post(&request()).await.unwrap();
}

#[tokio::test]
async fn test_non_negotiate_challenge_is_not_answered() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(401).insert_header("WWW-Authenticate", "Basic realm=\"WSMAN\""),
        )
        .mount(&server)
        .await;

    let negotiator = StaticNegotiator::new(b"token");
    let transport = transport_for(&server, negotiator.clone());
    let err = transport.post(&request()).await.unwrap_err();

    assert_eq!(err.status(), Some(401));
    assert_eq!(negotiator.calls(), 0);
}

#[tokio::test]
async fn test_rejected_token_is_http_error() {
    let server = MockServer::start().await;
    mount_negotiate(&server, ResponseTemplate::new(401)).await;

    let negotiator = StaticNegotiator::new(b"token");
    let transport = transport_for(&server, negotiator.clone());
    let err = transport.post(&request()).await.unwrap_err();

    assert_eq!(err.status(), Some(401));
    assert_eq!(negotiator.calls(), 1);
}

#[tokio::test]
async fn test_token_failure_is_negotiation_error() {
    let server = MockServer::start().await;
    mount_negotiate(&server, soap_ok(RESPONSE)).await;

    let transport = transport_for(&server, FailingNegotiator);
    let err = transport.post(&request()).await.unwrap_err();

    assert!(matches!(err, TransportError::Negotiation(_)));
    assert!(err.to_string().contains("No Kerberos credentials available"));
}

// base64 of "server"
const SERVER_TOKEN_B64: &str = "c2VydmVy";

#[tokio::test]
async fn test_server_token_is_verified() {
    let server = MockServer::start().await;
    mount_negotiate(&server, soap_ok_with_server_token(RESPONSE, SERVER_TOKEN_B64)).await;

    let negotiator = StaticNegotiator::new(b"token").requiring_mutual_auth();
    let transport = transport_for(&server, negotiator.clone());

    assert_eq!(transport.post(&request()).await.unwrap(), RESPONSE);
    assert_eq!(negotiator.server_tokens(), vec![b"server".to_vec()]);
}

#[tokio::test]
async fn test_unverifiable_server_token_is_rejected() {
    let server = MockServer::start().await;
    mount_negotiate(&server, soap_ok_with_server_token(RESPONSE, SERVER_TOKEN_B64)).await;

    let negotiator = StaticNegotiator::new(b"token").rejecting_server_tokens();
    let transport = transport_for(&server, negotiator.clone());
    let err = transport.post(&request()).await.unwrap_err();

    assert!(matches!(err, TransportError::Negotiation(_)));
    assert!(err.to_string().contains("mutual authentication failed"));
    assert_eq!(negotiator.server_tokens().len(), 1);
}

#[tokio::test]
async fn test_missing_server_token_fails_mutual_auth() {
    let server = MockServer::start().await;
    mount_negotiate(&server, soap_ok(RESPONSE)).await;

    let transport = transport_for(
        &server,
        StaticNegotiator::new(b"token").requiring_mutual_auth(),
    );
    let err = transport.post(&request()).await.unwrap_err();

    assert!(matches!(err, TransportError::Negotiation(_)));
    assert!(err.to_string().contains("did not return a Negotiate token"));
}

#[tokio::test]
async fn test_fault_without_server_token_is_http_error() {
    let server = MockServer::start().await;
    mount_negotiate(&server, operation_timeout_fault()).await;

    let transport = transport_for(
        &server,
        StaticNegotiator::new(b"token").requiring_mutual_auth(),
    );
    let err = transport.post(&request()).await.unwrap_err();

    assert_eq!(err.status(), Some(500));
}

// ============================================================================
// Connection handling
// ============================================================================

#[tokio::test]
async fn test_connection_refused_is_request_error() {
    let mut transport = KerberosTransport::new(StaticNegotiator::new(b"token"));
    transport
        .configure(&Endpoint::new("127.0.0.1", closed_port()))
        .unwrap();

    let err = transport.post(&request()).await.unwrap_err();
    assert!(matches!(err, TransportError::Request(_)));
}

#[tokio::test]
async fn test_reconfigure_switches_server() {
    let first = MockServer::start().await;
    let second = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(soap_ok("<first/>"))
        .mount(&first)
        .await;
    Mock::given(method("POST"))
        .respond_with(soap_ok("<second/>"))
        .mount(&second)
        .await;

    let mut transport = transport_for(&first, StaticNegotiator::new(b"token"));
    assert_eq!(transport.post(&request()).await.unwrap(), "<first/>");

    transport.configure(&endpoint_for(&second)).unwrap();
    assert_eq!(transport.post(&request()).await.unwrap(), "<second/>");
    assert_eq!(
        transport.endpoint_url(),
        Some(format!("{}/wsman", second.uri()))
    );
}
