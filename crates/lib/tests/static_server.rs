//! Integration test: serve a temporary dist directory and check asset and SPA fallback responses.

use std::path::PathBuf;

fn temp_dist_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("legado-dist-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(dir.join("assets")).expect("create dist dir");
    std::fs::write(dir.join("index.html"), "<!doctype html><div id=\"root\"></div>")
        .expect("write index.html");
    std::fs::write(dir.join("assets").join("app.js"), "console.log('legado');")
        .expect("write app.js");
    dir
}

async fn spawn_server(dist: PathBuf) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind free port");
    let addr = listener.local_addr().expect("local_addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, legado::server::router(&dist)).await;
    });
    format!("http://{}", addr)
}

#[tokio::test]
async fn serves_assets_and_falls_back_to_index() {
    let dist = temp_dist_dir();
    let base = spawn_server(dist.clone()).await;
    let client = reqwest::Client::new();

    let asset = client
        .get(format!("{}/assets/app.js", base))
        .send()
        .await
        .expect("GET asset");
    assert!(asset.status().is_success());
    assert_eq!(asset.text().await.unwrap(), "console.log('legado');");

    for route in ["/", "/servicos/registro", "/contato?utm=x"] {
        let page = client
            .get(format!("{}{}", base, route))
            .send()
            .await
            .expect("GET route");
        assert_eq!(page.status().as_u16(), 200, "route {}", route);
        assert!(page.text().await.unwrap().contains("id=\"root\""), "route {}", route);
    }

    let _ = std::fs::remove_dir_all(dist);
}
