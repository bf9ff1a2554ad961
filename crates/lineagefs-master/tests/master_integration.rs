//! End-to-end scenarios for the metadata master: namespace operations,
//! raw tables, worker caching and checkpoints, lineage recovery after a
//! worker failure, and journal recovery across restarts.

mod common;

use common::new_master;
use tempfile::TempDir;

use lineagefs_master::dependency::DependencyType;
use lineagefs_master::master::Master;
use lineagefs_master::types::{current_time_ms, MasterError, NetAddress};

#[test]
fn test_simple_create_and_list() {
    let dir = TempDir::new().unwrap();
    let (master, _) = new_master(dir.path());

    let id = master.create("/a/b", false, true, -1, Vec::new()).unwrap();
    assert_eq!(id, 3); // root=1, /a=2

    assert_eq!(master.ls("/a", false).unwrap(), vec!["/a/b"]);

    let info = master.get_file_info("/a/b").unwrap();
    assert!(!info.folder);
    assert_eq!(info.path, "/a/b");
    assert_eq!(info.size_bytes, -1);
    assert!(!info.ready);

    let folder_info = master.get_file_info("/a").unwrap();
    assert!(folder_info.folder);

    assert_eq!(master.list_files("/a", false).unwrap(), vec![3]);
    assert_eq!(master.list_files("/a/b", true).unwrap(), vec![3]);
}

#[test]
fn test_raw_table_layout() {
    let dir = TempDir::new().unwrap();
    let (master, _) = new_master(dir.path());

    let id = master.create_raw_table("/t", 3, b"m".to_vec()).unwrap();

    let mut columns = master.ls("/t", false).unwrap();
    columns.sort();
    assert_eq!(columns, vec!["/t/COL_0", "/t/COL_1", "/t/COL_2"]);

    let info = master.get_raw_table_info("/t").unwrap();
    assert_eq!(info.id, id);
    assert_eq!(info.columns, 3);
    assert_eq!(info.metadata, b"m".to_vec());

    let by_id = master.get_raw_table_info_by_id(id).unwrap();
    assert_eq!(by_id, info);
}

#[test]
fn test_cache_then_checkpoint() {
    let dir = TempDir::new().unwrap();
    let (master, _) = new_master(dir.path());

    let worker = master.register_worker(NetAddress::new("host-w", 29998), 1000, 0, &[]);
    let file = master.create("/f", false, true, -1, Vec::new()).unwrap();

    // no dependency: nothing to checkpoint-schedule
    assert_eq!(master.cached_file(worker, 100, file, 42).unwrap(), -1);
    assert_eq!(
        master.get_file_locations("/f").unwrap(),
        vec![NetAddress::new("host-w", 29998)]
    );
    assert_eq!(master.get_in_memory_files(), vec!["/f"]);

    assert!(master
        .add_checkpoint(worker, file, 42, "ext://store/f")
        .unwrap());
    let info = master.get_file_info("/f").unwrap();
    assert_eq!(info.checkpoint_path, "ext://store/f");
    assert!(info.ready);
    assert_eq!(info.size_bytes, 42);

    // the recorded length is immutable once set
    assert!(matches!(
        master.cached_file(worker, 100, file, 43),
        Err(MasterError::SuspectedFileSize {
            recorded: 42,
            reported: 43,
            ..
        })
    ));
}

#[test]
fn test_lineage_recovery_after_worker_failure() {
    let dir = TempDir::new().unwrap();
    let (master, launcher) = new_master(dir.path());

    let worker = master.register_worker(NetAddress::new("host-w", 29998), 1000, 0, &[]);
    let parent = master.create("/p", false, true, -1, Vec::new()).unwrap();
    let child = master.create("/c", false, true, -1, Vec::new()).unwrap();

    master.cached_file(worker, 10, parent, 10).unwrap();
    let dep = master
        .create_dependency(
            &["/p".to_string()],
            &["/c".to_string()],
            "prog --out /c",
            Vec::new(),
            "",
            "fw",
            "1",
            DependencyType::Narrow,
        )
        .unwrap();
    master.cached_file(worker, 30, child, 20).unwrap();

    // the worker dies: both /p and /c lose their only copies
    let lost = master.liveness_sweep_at(current_time_ms() + 11_000);
    assert_eq!(lost, 1);
    assert_eq!(master.get_worker_count(), 0);
    let restart_hook = format!("{}/bin/restart-failed-workers.sh", dir.path().display());
    assert_eq!(launcher.commands(), vec![restart_hook]);

    // /p has no lineage, so the dependency cannot launch yet
    assert!(!master.schedule_recomputation_once());
    assert_eq!(launcher.commands().len(), 1);

    // a replacement worker re-caches /p; now the dependency launches
    let worker2 = master.register_worker(NetAddress::new("host-w2", 29998), 1000, 0, &[]);
    assert_eq!(master.cached_file(worker2, 10, parent, 10).unwrap(), -1);
    assert!(master.schedule_recomputation_once());

    let commands = launcher.commands();
    assert_eq!(commands.len(), 2);
    let rerun = format!("prog --out /c &> {}/logs/rerun 1", dir.path().display());
    assert_eq!(commands[1], rerun);

    // launched work is not re-planned
    assert!(!master.schedule_recomputation_once());
    assert_eq!(launcher.commands().len(), 2);

    // the recomputed child coming back clears its recovery state
    assert_eq!(master.cached_file(worker2, 30, child, 20).unwrap(), dep);
}

#[test]
fn test_rename_survives_restart() {
    let dir = TempDir::new().unwrap();
    let id = {
        let (master, _) = new_master(dir.path());
        let id = master.create("/x/y", false, true, -1, Vec::new()).unwrap();
        master.rename("/x/y", "/x/z").unwrap();
        assert_eq!(master.get_file_id("/x/y").unwrap(), -1);
        assert_eq!(master.get_file_id("/x/z").unwrap(), id);
        id
    };

    let (master, _) = new_master(dir.path());
    assert_eq!(master.get_file_id("/x/y").unwrap(), -1);
    assert_eq!(master.get_file_id("/x/z").unwrap(), id);
}

#[test]
fn test_journal_compaction_preserves_counters() {
    let dir = TempDir::new().unwrap();
    let mut max_id = 0;
    {
        let (master, _) = new_master(dir.path());
        for k in 0..100 {
            let id = master
                .create(&format!("/files/f{}", k), false, true, -1, Vec::new())
                .unwrap();
            max_id = max_id.max(id);
        }
        for k in 0..50 {
            master.delete_path(&format!("/files/f{}", k)).unwrap();
        }
        master.checkpoint().unwrap();
    }

    let (master, _) = new_master(dir.path());
    for k in 0..50 {
        assert_eq!(master.get_file_id(&format!("/files/f{}", k)).unwrap(), -1);
    }
    for k in 50..100 {
        assert!(master.get_file_id(&format!("/files/f{}", k)).unwrap() > 0);
    }
    // ids are never reused, even across restarts
    let fresh = master.create("/after", false, true, -1, Vec::new()).unwrap();
    assert_eq!(fresh, max_id + 1);
}

#[test]
fn test_recovery_reproduces_state_without_checkpoint_trigger() {
    let dir = TempDir::new().unwrap();
    let (file_id, table_id) = {
        let (master, _) = new_master(dir.path());
        let table_id = master.create_raw_table("/t", 2, b"meta".to_vec()).unwrap();
        let file_id = master.create("/data/f", false, true, -1, Vec::new()).unwrap();
        master.delete_path("/t/COL_1").unwrap();
        (file_id, table_id)
    };

    let (master, _) = new_master(dir.path());
    assert_eq!(master.get_file_id("/data/f").unwrap(), file_id);
    assert_eq!(master.get_raw_table_id("/t").unwrap(), table_id);
    assert_eq!(master.get_file_id("/t/COL_1").unwrap(), -1);
    let info = master.get_raw_table_info("/t").unwrap();
    assert_eq!(info.columns, 2);
    assert_eq!(info.metadata, b"meta".to_vec());
}

#[test]
fn test_pin_set_survives_restart() {
    let dir = TempDir::new().unwrap();
    let mut config = common::test_config(dir.path());
    config.pinlist = "/pinned".to_string();

    let pinned_id = {
        let launcher = std::sync::Arc::new(lineagefs_master::launcher::RecordingLauncher::new());
        let master = Master::new(config.clone(), launcher).unwrap();
        let id = master.create("/pinned/f", false, true, -1, Vec::new()).unwrap();
        master.create("/plain", false, true, -1, Vec::new()).unwrap();
        assert_eq!(master.get_pin_id_list(), vec![id]);
        id
    };

    let launcher = std::sync::Arc::new(lineagefs_master::launcher::RecordingLauncher::new());
    let master = Master::new(config, launcher).unwrap();
    assert_eq!(master.get_pin_id_list(), vec![pinned_id]);
    assert!(master.get_file_info_by_id(pinned_id).unwrap().need_pin);
}

#[test]
fn test_dependency_survives_restart() {
    let dir = TempDir::new().unwrap();
    let dep = {
        let (master, _) = new_master(dir.path());
        master.create("/p", false, true, -1, Vec::new()).unwrap();
        master.create("/c", false, true, -1, Vec::new()).unwrap();
        master
            .create_dependency(
                &["/p".to_string()],
                &["/c".to_string()],
                "prog --out /c",
                vec![b"payload".to_vec()],
                "",
                "fw",
                "1",
                DependencyType::Narrow,
            )
            .unwrap()
    };

    let (master, _) = new_master(dir.path());
    let info = master.get_client_dependency_info(dep).unwrap();
    assert_eq!(info.data, vec![b"payload".to_vec()]);
    let child = master.get_file_id("/c").unwrap();
    assert_eq!(master.get_file_info_by_id(child).unwrap().dependency_id, dep);
    // still awaiting a checkpoint after recovery
    assert_eq!(master.get_priority_dependency_list(), vec![dep]);
}

#[test]
fn test_create_delete_round_trip_leaves_no_trace() {
    let dir = TempDir::new().unwrap();
    let (master, _) = new_master(dir.path());

    master.create("/keep", false, true, -1, Vec::new()).unwrap();
    let before = master.ls("/", true).unwrap();

    master.create("/tmp/x/y", false, true, -1, Vec::new()).unwrap();
    master.delete_path("/tmp").unwrap();

    let mut after = master.ls("/", true).unwrap();
    after.sort();
    let mut before_sorted = before;
    before_sorted.sort();
    assert_eq!(after, before_sorted);
    assert_eq!(master.get_file_id("/tmp").unwrap(), -1);
}

#[test]
fn test_worker_reregistration_recovers_via_queue() {
    let dir = TempDir::new().unwrap();
    let (master, _) = new_master(dir.path());
    let file = master.create("/f", false, true, -1, Vec::new()).unwrap();

    let w1 = master.register_worker(NetAddress::new("host", 29998), 1000, 0, &[]);
    master.cached_file(w1, 10, file, 42).unwrap();

    // same address registers again (worker restarted): the old record is
    // queued as lost and the next sweep cleans up its location
    let w2 = master.register_worker(NetAddress::new("host", 29998), 1000, 0, &[file]);
    assert_ne!(w1, w2);
    assert_eq!(master.get_worker_count(), 1);

    master.liveness_sweep_at(current_time_ms());
    let locations = master.get_file_locations_by_id(file).unwrap();
    assert_eq!(locations, vec![NetAddress::new("host", 29998)]);
    assert_eq!(master.worker_heartbeat(w1, 0, &[]), lineagefs_master::types::WorkerCommand::Register);
}
