//! 集成测试 - 端到端传输
//!
//! 发送端和接收端工作流通过进程内连接对或 WebSocket 直连交换文件。

use instashare_core::config::AckMode;
use instashare_core::transfer::MemoryFileSink;
use instashare_core::transport::{memory, ws};
use instashare_core::workflow::ReceiveEvent;
use instashare_core::{
    AcceptPolicy, DownloadDir, ReceiveOptions, Receiver, SendOptions, Sender, ShareLink,
    SimpleReceiveCallback, SimpleSendCallback, TransferableFile, TransportError, WsHost,
};

fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| u8::try_from(i % 251).unwrap().wrapping_add(seed))
        .collect()
}

/// 两个文件依次传输，内容逐字节一致，互不混合
#[tokio::test]
async fn test_two_files_round_trip() {
    let (mut sender_conn, mut receiver_conn) = memory::pair("sender", "receiver");

    let first = pattern(150 * 1024, 1);
    let second = pattern(10 * 1024, 7);
    let files = vec![
        TransferableFile::from_bytes("cat.png", None, first.clone()),
        TransferableFile::from_bytes("clip.mp4", None, second.clone()),
    ];

    let (send_cb, _send_events) = SimpleSendCallback::new();
    let (recv_cb, mut recv_events) = SimpleReceiveCallback::new();
    let mut sender = Sender::new(SendOptions::default());
    let mut receiver = Receiver::new(ReceiveOptions::default());
    let mut sink = MemoryFileSink::default();

    let (sent, received) = tokio::join!(
        sender.send_over(&mut sender_conn, &files, &send_cb),
        receiver.receive_over(&mut receiver_conn, &mut sink, &recv_cb),
    );
    let sent = sent.unwrap();
    let received = received.unwrap();

    assert_eq!(sent.acked, vec!["cat.png", "clip.mp4"]);
    assert!(!sent.session_closed_early);
    assert!(received.session_finished);
    assert!(received.incomplete.is_empty());

    assert_eq!(sink.files.len(), 2);
    assert_eq!(sink.files[0].name, "cat.png");
    assert_eq!(sink.files[0].payload, first);
    assert_eq!(sink.files[0].mime_type.as_deref(), Some("image/png"));
    assert_eq!(sink.files[1].name, "clip.mp4");
    assert_eq!(sink.files[1].payload, second);

    // 每个文件的进度单调递增，且 100 只出现一次
    let mut progress: Vec<(String, u8)> = Vec::new();
    while let Ok(event) = recv_events.try_recv() {
        if let ReceiveEvent::Progress { name, percent } = event {
            progress.push((name, percent));
        }
    }
    let cat: Vec<u8> = progress
        .iter()
        .filter(|(n, _)| n == "cat.png")
        .map(|(_, p)| *p)
        .collect();
    assert_eq!(cat, vec![43, 85, 100]);
    let clip: Vec<u8> = progress
        .iter()
        .filter(|(n, _)| n == "clip.mp4")
        .map(|(_, p)| *p)
        .collect();
    assert_eq!(clip, vec![100]);

    // 第二个文件的进度在第一个完成之后才出现
    let first_clip = progress.iter().position(|(n, _)| n == "clip.mp4").unwrap();
    let last_cat = progress.iter().rposition(|(n, _)| n == "cat.png").unwrap();
    assert!(last_cat < first_clip);
}

/// 不支持的类型被跳过，其余文件照常发送
#[tokio::test]
async fn test_unsupported_type_is_skipped() {
    let (mut sender_conn, mut receiver_conn) = memory::pair("sender", "receiver");
    let files = vec![
        TransferableFile::from_bytes("notes.pdf", None, vec![1u8; 100]),
        TransferableFile::from_bytes("photo.jpg", None, vec![2u8; 100]),
    ];

    let (send_cb, _send_events) = SimpleSendCallback::new();
    let (recv_cb, _recv_events) = SimpleReceiveCallback::new();
    let mut sender = Sender::new(SendOptions::default());
    let mut receiver = Receiver::new(ReceiveOptions::default());
    let mut sink = MemoryFileSink::default();

    let (sent, received) = tokio::join!(
        sender.send_over(&mut sender_conn, &files, &send_cb),
        receiver.receive_over(&mut receiver_conn, &mut sink, &recv_cb),
    );
    let sent = sent.unwrap();
    received.unwrap();

    assert_eq!(sent.skipped.len(), 1);
    assert_eq!(sent.skipped[0].name, "notes.pdf");
    assert_eq!(sent.acked, vec!["photo.jpg"]);
    assert_eq!(sink.files.len(), 1);
    assert_eq!(sink.files[0].name, "photo.jpg");
}

/// 先发送全部文件再收集确认，写入下载目录
#[tokio::test]
async fn test_deferred_ack_to_download_dir() {
    let dir = tempfile::TempDir::new().expect("create temp dir");
    let (mut sender_conn, mut receiver_conn) = memory::pair("sender", "receiver");
    let files = vec![
        TransferableFile::from_bytes("a.bin", None, pattern(3000, 3)),
        TransferableFile::from_bytes("a.bin", None, pattern(5000, 4)),
        TransferableFile::from_bytes("b.bin", None, Vec::new()),
    ];

    let options = SendOptions {
        chunk_size: 1024,
        accept_policy: AcceptPolicy::any(),
        ack_mode: AckMode::Deferred,
    };
    let (send_cb, _send_events) = SimpleSendCallback::new();
    let (recv_cb, _recv_events) = SimpleReceiveCallback::new();
    let mut sender = Sender::new(options);
    let mut receiver = Receiver::new(ReceiveOptions::default());
    let mut sink = DownloadDir::new(dir.path());

    let (sent, received) = tokio::join!(
        sender.send_over(&mut sender_conn, &files, &send_cb),
        receiver.receive_over(&mut receiver_conn, &mut sink, &recv_cb),
    );
    let sent = sent.unwrap();
    let received = received.unwrap();

    assert!(sent.all_acked());
    assert_eq!(sent.acked.len(), 3);
    assert_eq!(sent.sent[0].chunks_sent, 3);
    assert_eq!(sent.sent[2].chunks_sent, 0);

    assert_eq!(received.saved.len(), 3);
    assert_eq!(
        std::fs::read(dir.path().join("a.bin")).unwrap(),
        pattern(3000, 3)
    );
    assert_eq!(
        std::fs::read(dir.path().join("a (1).bin")).unwrap(),
        pattern(5000, 4)
    );
    assert!(std::fs::read(dir.path().join("b.bin")).unwrap().is_empty());
}

/// 发送端在第一块之后断开，文件不会被保存
#[tokio::test]
async fn test_sender_disconnect_leaves_file_incomplete() {
    let (mut sender_conn, mut receiver_conn) = memory::pair("sender", "receiver");

    let file = TransferableFile::from_bytes("cat.png", None, pattern(150 * 1024, 0));
    let metadata = instashare_core::WireMessage::metadata_for(&file);
    sender_conn
        .sink
        .send(metadata.into_frame().unwrap())
        .await
        .unwrap();
    sender_conn
        .sink
        .send(instashare_core::Frame::Binary(pattern(64 * 1024, 0)))
        .await
        .unwrap();
    sender_conn.close().await.unwrap();

    let (recv_cb, _recv_events) = SimpleReceiveCallback::new();
    let mut receiver = Receiver::new(ReceiveOptions::default());
    let mut sink = MemoryFileSink::default();
    let report = receiver
        .receive_over(&mut receiver_conn, &mut sink, &recv_cb)
        .await
        .unwrap();

    assert!(sink.files.is_empty());
    assert_eq!(report.incomplete.len(), 1);
    assert_eq!(report.incomplete[0].percent, 43);
    assert!(!report.notices.is_empty());
    assert!(!receiver.tracker().is_connected());
}

/// 通过 WebSocket 直连完成一次完整传输
#[tokio::test]
async fn test_websocket_end_to_end() {
    let dir = tempfile::TempDir::new().expect("create temp dir");
    let disk_path = dir.path().join("source.mp4");
    let content = pattern(200 * 1024, 9);
    std::fs::write(&disk_path, &content).unwrap();

    let host = WsHost::bind("127.0.0.1:0").await.unwrap();
    let link = host.share_link("127.0.0.1").unwrap();
    let link = ShareLink::parse(&link.to_string()).unwrap();

    let sender_task = tokio::spawn(async move {
        let mut conn = host.accept().await.unwrap();
        let files = vec![TransferableFile::from_path(&disk_path).await.unwrap()];
        let (callback, _events) = SimpleSendCallback::new();
        let mut sender = Sender::new(SendOptions::default());
        let report = sender.send_over(&mut conn, &files, &callback).await.unwrap();
        let _ = conn.close().await;
        report
    });

    let mut conn = ws::connect(&link).await.unwrap();
    let (callback, _events) = SimpleReceiveCallback::new();
    let mut receiver = Receiver::new(ReceiveOptions::default());
    let mut sink = DownloadDir::new(dir.path().join("downloads"));
    let received = receiver
        .receive_over(&mut conn, &mut sink, &callback)
        .await
        .unwrap();

    let sent = sender_task.await.unwrap();
    assert_eq!(sent.acked, vec!["source.mp4"]);
    assert!(received.session_finished);
    assert_eq!(
        std::fs::read(dir.path().join("downloads").join("source.mp4")).unwrap(),
        content
    );
}

/// 令牌错误的连接被拒绝
#[tokio::test]
async fn test_websocket_rejects_wrong_token() {
    let host = WsHost::bind("127.0.0.1:0").await.unwrap();
    let port = host.local_addr().unwrap().port();

    let _accepting = tokio::spawn(async move {
        let _ = host.accept().await;
    });

    let forged = ShareLink::parse(&format!("http://127.0.0.1:{port}/?token=forged")).unwrap();
    let result = ws::connect(&forged).await;
    assert!(matches!(result, Err(TransportError::Rejected(_))));
}
