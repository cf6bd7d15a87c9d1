mod common;

use std::sync::Arc;

use acompress::{
    AcompAlgorithm, Memory, OffloadBackend, OffloadOptions, ReqFlags, Request, ScatterList,
    ScompAdapter, Status, StreamOptions, TokioExecutor, ZstdScomp,
};
use common::{Recorder, Shape};

fn sample(len: usize) -> Vec<u8> {
    let mut rng = fastrand::Rng::with_seed(7);
    let words = ["block", "page", "stream", "chain", "folio", "scatter"];
    let mut out = Vec::with_capacity(len);
    while out.len() < len {
        out.extend_from_slice(words[rng.usize(..words.len())].as_bytes());
        out.push(b' ');
    }
    out.truncate(len);
    out
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn zstd_round_trip_on_worker_threads() {
    let exec = Arc::new(TokioExecutor::default().with_units(2));
    let alg: Arc<dyn AcompAlgorithm> = Arc::new(ScompAdapter::new(
        ZstdScomp::default(),
        exec,
        StreamOptions::default().units(2),
    ));
    let transform =
        OffloadBackend::transform(alg, OffloadOptions::default().workers(2)).expect("transform");
    assert!(transform.is_async());

    let input = sample(32 * 1024);
    let packed = Memory::zeroed(input.len());
    let req = Request::new();
    req.set_src_flat(Memory::from(input.clone()), input.len() as u32);
    req.set_dst_flat(packed.clone(), input.len() as u32);
    let packed_len = transform.compress_async(&req).await.expect("compress");
    assert!(packed_len > 0 && (packed_len as usize) < input.len());

    let restored = Memory::zeroed(input.len());
    let back = Request::new();
    back.set_src_flat(packed, packed_len);
    back.set_dst_flat(restored.clone(), input.len() as u32);
    let restored_len = transform.decompress_async(&back).await.expect("decompress");
    assert_eq!(restored_len as usize, input.len());
    assert_eq!(restored.to_vec(), input);
}

#[tokio::test]
async fn chained_jobs_report_once_from_a_worker() {
    let recorder = Arc::new(Recorder::new(2));
    let transform =
        OffloadBackend::transform(recorder.clone(), OffloadOptions::default()).expect("transform");

    let lead = Request::new();
    let jobs: Vec<Request> = (1..=3u32)
        .map(|i| {
            let req = Request::new();
            req.set_src_flat(Memory::from(vec![i as u8; 64]), 16 * i);
            req.set_dst_flat(Memory::zeroed(64), 64);
            req
        })
        .collect();
    lead.set_src_flat(Memory::from(vec![0u8; 64]), 64);
    lead.set_dst_flat(Memory::zeroed(64), 64);
    for job in &jobs {
        lead.chain(job);
    }

    let (tx, rx) = flume::unbounded();
    lead.set_callback(ReqFlags::MAY_BACKLOG, move |status| {
        let _ = tx.send(status);
    });

    assert_eq!(transform.compress(&lead), Status::Busy);
    assert_eq!(rx.recv_async().await.expect("completion"), Status::Success);

    let calls = recorder.calls();
    assert_eq!(calls.len(), 4);
    assert!(calls
        .iter()
        .all(|call| call.src == Shape::Scatter && call.dst == Shape::Scatter));
    assert_eq!(lead.dlen(), 32);
    for (i, job) in jobs.iter().enumerate() {
        assert_eq!(job.dlen(), 8 * (i as u32 + 1));
        assert_eq!(job.status(), Some(Status::Success));
    }
    assert_eq!(lead.chained().len(), 3);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn backlogged_requests_all_finish() {
    let recorder = Arc::new(Recorder::new(1));
    let transform = OffloadBackend::transform(
        recorder.clone(),
        OffloadOptions::default().workers(1).queue_depth(1),
    )
    .expect("transform");

    let (tx, rx) = flume::unbounded();
    let mut requests = Vec::new();
    for i in 0..16u8 {
        let req = Request::new();
        req.set_src_sg(ScatterList::one(Memory::from(vec![i; 8]), 0, 8), 8);
        req.set_dst_sg(ScatterList::one(Memory::zeroed(8), 0, 8), 8);
        let tx = tx.clone();
        req.set_callback(ReqFlags::MAY_BACKLOG, move |status: Status| {
            if status.is_terminal() {
                let _ = tx.send((i, status));
            }
        });
        let status = transform.compress(&req);
        assert!(
            matches!(status, Status::InProgress | Status::Busy),
            "unexpected {status:?}"
        );
        requests.push(req);
    }
    drop(tx);

    let mut finished = Vec::new();
    for _ in 0..requests.len() {
        let (i, status) = rx.recv_async().await.expect("completion");
        assert_eq!(status, Status::Success);
        finished.push(i);
    }
    finished.sort_unstable();
    assert_eq!(finished, (0..16).collect::<Vec<_>>());
    assert_eq!(recorder.calls().len(), 16);
    assert!(requests.iter().all(|req| req.dlen() == 8));
}
