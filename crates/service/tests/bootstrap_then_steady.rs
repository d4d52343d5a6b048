#![cfg(feature = "testkit")]

use std::sync::Arc;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn bootstrap_then_steady_then_relaunch() -> anyhow::Result<()> {
    use std::time::Duration;
    use tokio::time::timeout;

    use common::prelude::{Bookmark, SyncSlot};
    use serde_json::json;
    use service::testkit::{scripted_state, RecordingSink, ScriptedTransport};
    use service::Service;

    timeout(Duration::from_secs(30), async {
        let dir = tempfile::tempdir()?;
        let transport = ScriptedTransport::new();
        let sink = Arc::new(RecordingSink::new());
        let state = scripted_state(dir.path(), transport.clone(), sink);
        let service = Service::with_state(state.clone());

        state.store().set_bookmark(&Bookmark::new("remote1", "sftp").unwrap())?;
        state
            .store()
            .set_sync_slot("remote1", "work", &SyncSlot::bidirectional("/home/u/work", "backup"))?;

        // Bootstrap: conservative copy, forced resync, then the steady job.
        transport.script("sync/copy", Ok(json!({ "jobid": 1 })));
        transport.script("job/status", Ok(json!({ "finished": true, "error": "" })));
        transport.script("sync/bisync", Ok(json!({ "jobid": 2 })));
        transport.script("job/status", Ok(json!({ "finished": true, "error": "" })));
        transport.script("sync/bisync", Ok(json!({ "jobid": 3 })));

        service.syncs().start("remote1", "work").await?;
        assert!(state.store().sync_slot("remote1", "work")?.unwrap().initialized);
        assert_eq!(
            service.syncs().sync_status("remote1", "work").await.unwrap().job_id,
            3
        );

        // Starting again while job 3 runs is rejected, not queued.
        transport.script("job/status", Ok(json!({ "finished": false })));
        assert!(service.syncs().start("remote1", "work").await.is_err());

        // The finished pass is relaunched under a fresh job id.
        transport.script("job/status", Ok(json!({ "finished": true, "error": "" })));
        transport.script("sync/bisync", Ok(json!({ "jobid": 4 })));
        service.syncs().health_check().await;
        assert_eq!(
            service.syncs().sync_status("remote1", "work").await.unwrap().job_id,
            4
        );

        // Shutdown settles the tracked job and never hangs.
        transport.script("job/stop", Ok(json!({})));
        service.shutdown().await;
        assert!(service.syncs().active_jobs().await.is_empty());

        Ok::<(), anyhow::Error>(())
    })
    .await
    .map_err(|_| anyhow::anyhow!("test timed out"))??;
    Ok(())
}
