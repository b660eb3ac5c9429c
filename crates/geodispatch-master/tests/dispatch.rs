use futures::{SinkExt, StreamExt};
use geodispatch_core::Coordinates;
use geodispatch_master::{MasterConfig, RunSummary, Scheduler};
use geodispatch_persistence::{CheckpointFile, ResultsFile};
use geodispatch_protocol::{GeocodeReply, GeocodeRequest, WorkerCodec};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;

const INPUT: &str = "\
tipo_logradouro,logradouro,numero,uf,cep,municipio_descricao
Rua,A,10,SP,01000,São Paulo
Rua,B,20,RJ,02000,Rio de Janeiro
Rua,C,30,MG,03000,Belo Horizonte
";

type Worker = Framed<TcpStream, WorkerCodec>;

struct Harness {
    dir: TempDir,
    scheduler: Arc<Scheduler>,
    addr: SocketAddr,
    running: JoinHandle<anyhow::Result<RunSummary>>,
}

fn config(dir: &Path) -> MasterConfig {
    let mut config = MasterConfig::default();
    config.network.host = "127.0.0.1".to_string();
    config.network.port = 0;
    config.session.response_timeout_secs = 5;
    config.session.send_timeout_secs = 5;
    config.checkpoint.every_completions = 1;
    config.checkpoint.interval_secs = 0;
    config.checkpoint.checkpoint_path = dir.join("progress.txt");
    config.data.input_path = dir.join("base.csv");
    config.data.output_path = dir.join("enderecos_atualizados.csv");
    config.shutdown.grace_secs = 2;
    config
}

async fn start(dir: TempDir) -> Harness {
    if !dir.path().join("base.csv").exists() {
        std::fs::write(dir.path().join("base.csv"), INPUT).unwrap();
    }

    let scheduler = Arc::new(Scheduler::build(config(dir.path())).unwrap());
    let listener = scheduler.bind().await.unwrap();
    let addr = listener.local_addr().unwrap();

    let running = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.serve(listener).await })
    };

    Harness {
        dir,
        scheduler,
        addr,
        running,
    }
}

async fn connect(addr: SocketAddr) -> Worker {
    Framed::new(TcpStream::connect(addr).await.unwrap(), WorkerCodec::new())
}

async fn receive(worker: &mut Worker) -> GeocodeRequest {
    tokio::time::timeout(Duration::from_secs(5), worker.next())
        .await
        .expect("no request from master")
        .expect("connection closed")
        .unwrap()
}

fn reply(lat: f64, lon: f64) -> GeocodeReply {
    GeocodeReply::found(Coordinates::new(lat, lon).unwrap())
}

fn read_output(path: &Path) -> Vec<Vec<String>> {
    let mut reader = csv::Reader::from_path(path).unwrap();
    let headers = reader.headers().unwrap().clone();
    assert_eq!(headers.get(6), Some("latitude"));
    assert_eq!(headers.get(7), Some("longitude"));

    reader
        .records()
        .map(|r| r.unwrap().iter().map(str::to_string).collect())
        .collect()
}

/// Poll until the master has caught up with a worker going away
async fn wait_until(condition: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached");
}

async fn finish(harness: Harness) -> (RunSummary, TempDir) {
    let summary = tokio::time::timeout(Duration::from_secs(10), harness.running)
        .await
        .expect("master did not exit")
        .unwrap()
        .unwrap();
    (summary, harness.dir)
}

#[tokio::test]
async fn test_single_worker_completes_dataset() {
    let harness = start(TempDir::new().unwrap()).await;
    let mut worker = connect(harness.addr).await;

    let replies = [(12.0, 34.0), (13.0, 35.0), (14.0, 36.0)];
    for (lat, lon) in replies {
        receive(&mut worker).await;
        worker.send(reply(lat, lon)).await.unwrap();
    }

    // Nothing left: the master closes the connection
    assert!(worker.next().await.is_none());

    let scheduler = harness.scheduler.clone();
    let (summary, dir) = finish(harness).await;
    assert_eq!(summary.completed, 3);
    assert_eq!(summary.pending, 0);
    assert_eq!(summary.checkpoint, 3);
    assert!(scheduler.queue().is_drained());

    let rows = read_output(&dir.path().join("enderecos_atualizados.csv"));
    let coordinates: Vec<_> = rows.iter().map(|r| (r[6].as_str(), r[7].as_str())).collect();
    assert_eq!(coordinates, vec![("12", "34"), ("13", "35"), ("14", "36")]);

    let checkpoint = CheckpointFile::new(dir.path().join("progress.txt"));
    assert_eq!(checkpoint.load().unwrap(), Some(3));
}

#[tokio::test]
async fn test_disconnected_item_goes_to_next_worker() {
    let harness = start(TempDir::new().unwrap()).await;

    let mut first = connect(harness.addr).await;
    assert_eq!(receive(&mut first).await.endereco, "Rua A, 10, SP, 01000, Brasil");
    first.send(reply(12.0, 34.0)).await.unwrap();

    // Take row 1 and vanish without answering
    assert_eq!(receive(&mut first).await.endereco, "Rua B, 20, RJ, 02000, Brasil");
    drop(first);
    let queue = harness.scheduler.queue().clone();
    wait_until(|| queue.inventory().pending == vec![2, 1]).await;

    let mut second = connect(harness.addr).await;
    let mut seen = Vec::new();
    while let Some(request) = tokio::time::timeout(Duration::from_secs(5), second.next())
        .await
        .unwrap()
    {
        let request = request.unwrap();
        seen.push(request.endereco.clone());
        second.send(reply(20.0, 40.0)).await.unwrap();
    }

    // Row 2 was still ahead of the requeued row 1
    assert_eq!(
        seen,
        vec![
            "Rua C, 30, MG, 03000, Brasil".to_string(),
            "Rua B, 20, RJ, 02000, Brasil".to_string(),
        ]
    );

    let (summary, dir) = finish(harness).await;
    assert_eq!(summary.completed, 3);

    let rows = read_output(&dir.path().join("enderecos_atualizados.csv"));
    assert_eq!(rows[0][6], "12");
    assert_eq!(rows[1][6], "20");
    assert_eq!(rows[2][6], "20");
}

#[tokio::test]
async fn test_repeated_failures_then_success() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("base.csv"),
        "tipo_logradouro,logradouro,numero,uf,cep,municipio_descricao\nRua,A,10,SP,01000,São Paulo\n",
    )
    .unwrap();
    let harness = start(dir).await;

    let queue = harness.scheduler.queue().clone();
    for _ in 0..3 {
        let mut worker = connect(harness.addr).await;
        receive(&mut worker).await;
        drop(worker);
        wait_until(|| queue.len() == 1).await;
    }

    let mut worker = connect(harness.addr).await;
    receive(&mut worker).await;
    worker.send(reply(-23.55, -46.63)).await.unwrap();

    let scheduler = harness.scheduler.clone();
    let (summary, dir) = finish(harness).await;
    assert_eq!(summary.completed, 1);
    assert_eq!(scheduler.metrics().items_requeued.get(), 3);
    assert_eq!(scheduler.results().len(), 1);

    let rows = read_output(&dir.path().join("enderecos_atualizados.csv"));
    assert_eq!((rows[0][6].as_str(), rows[0][7].as_str()), ("-23.55", "-46.63"));
}

#[tokio::test]
async fn test_restart_resumes_and_keeps_earlier_results() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("base.csv"), INPUT).unwrap();

    // A previous run finished row 0 and saved its checkpoint
    let output = "\
tipo_logradouro,logradouro,numero,uf,cep,municipio_descricao,latitude,longitude
Rua,A,10,SP,01000,São Paulo,12,34
Rua,B,20,RJ,02000,Rio de Janeiro,,
Rua,C,30,MG,03000,Belo Horizonte,,
";
    std::fs::write(dir.path().join("enderecos_atualizados.csv"), output).unwrap();
    CheckpointFile::new(dir.path().join("progress.txt")).save(1).unwrap();

    let harness = start(dir).await;
    assert_eq!(harness.scheduler.queue().total(), 2);

    let mut worker = connect(harness.addr).await;
    assert_eq!(receive(&mut worker).await.endereco, "Rua B, 20, RJ, 02000, Brasil");
    worker.send(reply(13.0, 35.0)).await.unwrap();
    assert_eq!(receive(&mut worker).await.endereco, "Rua C, 30, MG, 03000, Brasil");
    worker.send(GeocodeReply::not_found()).await.unwrap();

    let (summary, dir) = finish(harness).await;
    assert_eq!(summary.checkpoint, 3);

    let results = ResultsFile::new(dir.path().join("enderecos_atualizados.csv"));
    let stored = results.load().unwrap().unwrap();
    let indices: Vec<_> = stored.iter().map(|r| r.index).collect();
    assert_eq!(indices, vec![0, 1]);
    assert_eq!(stored[0].latitude(), Some(12.0));

    let rows = read_output(results.path());
    assert_eq!((rows[2][6].as_str(), rows[2][7].as_str()), ("", ""));
}

#[tokio::test]
async fn test_shutdown_requeues_in_flight_item() {
    let mut harness = start(TempDir::new().unwrap()).await;
    let mut worker = connect(harness.addr).await;
    receive(&mut worker).await;

    harness.scheduler.shutdown().cancel();
    let summary = tokio::time::timeout(Duration::from_secs(10), &mut harness.running)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    assert_eq!(summary.completed, 0);
    assert_eq!(summary.pending, 3);
    assert_eq!(summary.in_flight, 0);
    assert_eq!(summary.checkpoint, 0);
    drop(worker);
}

#[tokio::test]
async fn test_shutdown_lets_current_exchange_finish() {
    let mut harness = start(TempDir::new().unwrap()).await;
    let mut worker = connect(harness.addr).await;
    assert_eq!(receive(&mut worker).await.endereco, "Rua A, 10, SP, 01000, Brasil");

    // The reply arrives after shutdown but within the grace period
    harness.scheduler.shutdown().cancel();
    tokio::time::sleep(Duration::from_millis(200)).await;
    worker.send(reply(12.0, 34.0)).await.unwrap();

    // No further request: the master closes the connection
    let next = tokio::time::timeout(Duration::from_secs(5), worker.next())
        .await
        .unwrap();
    assert!(next.is_none());

    let summary = tokio::time::timeout(Duration::from_secs(10), &mut harness.running)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(
        summary,
        RunSummary {
            completed: 1,
            pending: 2,
            in_flight: 0,
            checkpoint: 1,
        }
    );

    let checkpoint = CheckpointFile::new(harness.dir.path().join("progress.txt"));
    assert_eq!(checkpoint.load().unwrap(), Some(1));

    let rows = read_output(&harness.dir.path().join("enderecos_atualizados.csv"));
    assert_eq!((rows[0][6].as_str(), rows[0][7].as_str()), ("12", "34"));
    assert_eq!((rows[1][6].as_str(), rows[1][7].as_str()), ("", ""));
}
