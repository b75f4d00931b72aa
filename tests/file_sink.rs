use api_key_proxy::access_log::{FileSink, LogSink};
use std::sync::Arc;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_appends_do_not_interleave() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("requests.log");
    let sink = Arc::new(FileSink::open(&path).await.unwrap());

    let mut tasks = Vec::new();
    for writer in 0..8 {
        let sink = sink.clone();
        tasks.push(tokio::spawn(async move {
            for n in 0..50 {
                let line = format!("writer-{writer} line-{n} {}\n", "x".repeat(200));
                sink.append(&line).await.unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let contents = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), 400);
    for line in lines {
        let fields: Vec<&str> = line.split(' ').collect();
        assert_eq!(fields.len(), 3);
        assert!(fields[0].starts_with("writer-"));
        assert_eq!(fields[2].len(), 200);
    }
}
