//! A `RemotePlayer` registered with a live server.

mod common;

use std::time::Duration;

use bell::player::RemotePlayer;
use common::*;

#[tokio::test]
async fn remote_player_plays_routed_sound_and_speech() {
    let app = create_test_app(None).await;
    let addr = start_server(test_router(app.state.clone())).await;

    let cache = tempfile::tempdir().unwrap();
    let (player, mut played) = recording_player();
    let remote = RemotePlayer::new(format!("http://{}", addr), "attic", player, cache.path());

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        remote
            .run(async {
                let _ = stop_rx.await;
            })
            .await
    });

    let registry = app.state.registry.clone();
    assert!(eventually(|| registry.contains("attic")).await);

    let resp = reqwest::get(format!("http://{}/api/v1/play/gong?destination=attic", addr))
        .await
        .unwrap();
    assert_eq!(resp.status(), 204);

    let (path, audio) = tokio::time::timeout(Duration::from_secs(5), played.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(path.starts_with(cache.path()));
    assert_eq!(audio, b"ID3-gong");

    let resp = reqwest::Client::new()
        .post(format!("http://{}/api/v1/tts", addr))
        .form(&[("text", "door bell"), ("destination", "attic")])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 204);

    let (_, audio) = tokio::time::timeout(Duration::from_secs(5), played.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(audio, b"RIFF:door bell");

    stop_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(3), task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(eventually(|| !registry.contains("attic")).await);
}

#[tokio::test]
async fn remote_player_returns_when_server_shuts_down() {
    let app = create_test_app(None).await;
    let addr = start_server(test_router(app.state.clone())).await;

    let cache = tempfile::tempdir().unwrap();
    let (player, _played) = recording_player();
    let remote = RemotePlayer::new(addr.to_string(), "porch", player, cache.path());
    let task = tokio::spawn(async move { remote.run(std::future::pending()).await });

    let registry = app.state.registry.clone();
    assert!(eventually(|| registry.contains("porch")).await);

    bell::shutdown::ShutdownCoordinator::new(registry).close_all().await;
    tokio::time::timeout(Duration::from_secs(3), task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn unreachable_server_is_an_error() {
    let cache = tempfile::tempdir().unwrap();
    let (player, _played) = recording_player();
    let remote = RemotePlayer::new("http://127.0.0.1:1", "nobody", player, cache.path());
    assert!(remote.run(std::future::pending()).await.is_err());
}
