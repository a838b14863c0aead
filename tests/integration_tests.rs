//! Integration tests for the Chrome backend
#![cfg(feature = "cdp")]

use rfsmoke::cdp::CdpBrowser;
use rfsmoke::{config, BrowserDriver, CheckSpec, HarnessConfig, PageDriver, PageTestSession, RequestOptions, Runner};
use std::io::Read;
use std::sync::Once;
use tiny_http::{Header, Response, Server};

static INIT: Once = Once::new();

fn header(raw: &str) -> Header {
    raw.parse::<Header>().unwrap()
}

/// Start a simple test HTTP server
fn start_test_server() -> String {
    INIT.call_once(|| {
        std::thread::spawn(|| {
            let server = Server::http("127.0.0.1:18081").unwrap();
            for mut request in server.incoming_requests() {
                let path = request.url().to_string();
                let response = match path.as_str() {
                    "/" => Response::from_string(
                        r#"<!DOCTYPE html>
<html>
<head><title>Test Page</title><link rel="stylesheet" href="/main.css"></head>
<body>
<h1 class="title">Hello from Test Server</h1>
<ul><li class="item">a</li><li class="item">b</li></ul>
</body>
</html>"#,
                    )
                    .with_header(header("Content-Type: text/html; charset=utf-8"))
                    .with_header(header("Cache-Control: public, max-age=60")),
                    "/main.css" => Response::from_string(".title{color:red}.unused{color:blue}")
                        .with_header(header("Content-Type: text/css")),
                    "/redirect" => Response::from_string("").with_status_code(301).with_header(header("Location: /")),
                    "/echo" => {
                        let mut body = String::new();
                        let _ = request.as_reader().read_to_string(&mut body);
                        let method = request.method().to_string();
                        Response::from_string(format!("<pre id=\"echo\">{} {}</pre>", method, body))
                            .with_status_code(201)
                            .with_header(header("Content-Type: text/html"))
                    }
                    "/framed" => Response::from_string(r#"<h1>framed</h1><iframe src="/ad-slot"></iframe>"#)
                        .with_header(header("Content-Type: text/html"))
                        .with_header(header("Cache-Control: max-age=30")),
                    "/error" => Response::from_string("<script>throw new Error('boom')</script>")
                        .with_header(header("Content-Type: text/html")),
                    _ => Response::from_string("Not Found").with_status_code(404),
                };
                let _ = request.respond(response);
            }
        });
        // Give the server time to start
        std::thread::sleep(std::time::Duration::from_millis(100));
    });

    "http://127.0.0.1:18081".to_string()
}

fn harness() -> HarnessConfig {
    HarnessConfig { host: start_test_server(), ..Default::default() }
}

#[tokio::test]
#[ignore] // Requires Chrome to be installed
async fn test_status_and_redirect() {
    let harness = harness();
    let browser = CdpBrowser::launch(&harness).expect("Failed to launch Chrome");

    let mut session = PageTestSession::new(harness.url_for("/redirect"), RequestOptions::default(), CheckSpec::status(301));
    session.init(&browser).await.expect("init failed");
    assert_eq!(session.status().unwrap(), 301);
    assert_eq!(session.redirect().unwrap().map(|r| r.to), Some("/".to_string()));
    session.close().await.unwrap();

    browser.close().await.unwrap();
}

#[tokio::test]
#[ignore] // Requires Chrome to be installed
async fn test_iframe_does_not_replace_page_response() {
    let harness = harness();
    let browser = CdpBrowser::launch(&harness).expect("Failed to launch Chrome");

    // pageErrors waits for the full load, so the 404 frame has finished too
    let check = CheckSpec::status(200).with_page_errors(0);
    let mut session = PageTestSession::new(harness.url_for("/framed"), RequestOptions::default(), check);
    session.init(&browser).await.expect("init failed");
    assert_eq!(session.status().unwrap(), 200);
    let headers = session.headers().unwrap().unwrap();
    assert_eq!(headers.get("cache-control").map(String::as_str), Some("max-age=30"));
    session.close().await.unwrap();

    browser.close().await.unwrap();
}

#[tokio::test]
#[ignore] // Requires Chrome to be installed
async fn test_post_override() {
    let harness = harness();
    let browser = CdpBrowser::launch(&harness).expect("Failed to launch Chrome");
    let opts = RequestOptions {
        method: "POST".into(),
        body: Some(rfsmoke::RequestBody::Text("hello".into())),
        ..Default::default()
    };
    let mut session = PageTestSession::new(harness.url_for("/echo"), opts, CheckSpec::status(201));
    session.init(&browser).await.expect("init failed");
    assert_eq!(session.status().unwrap(), 201);
    let text = session.page().unwrap().inner_text("#echo").await.unwrap();
    assert_eq!(text.as_deref(), Some("POST hello"));
    session.close().await.unwrap();

    browser.close().await.unwrap();
}

#[tokio::test]
#[ignore] // Requires Chrome to be installed
async fn test_full_suite() {
    let harness = harness();
    let browser = CdpBrowser::launch(&harness).expect("Failed to launch Chrome");
    let suites = config::parse_suites(
        r#"[{"urls": {
            "/": {"status": 200, "cacheHeaders": true, "content": "Hello", "elements": {".item": 2}, "cssCoverage": {"main.css": 10}},
            "/missing": 404,
            "/error": {"pageErrors": 1}
        }}]"#,
    )
    .unwrap();

    let summary = Runner::new(&harness, &browser).run(&suites).await;
    assert_eq!(summary.failures(), 0, "{:?}", summary);

    browser.close().await.unwrap();
}
