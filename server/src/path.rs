//! Asynchronous pathfinding service and per-object path store.
//!
//! A fixed pool of worker threads blocks on an MPMC task queue, runs A* over
//! an immutable navmap handle, and pushes the resulting waypoint list onto a
//! result queue. The tick loop drains results once per tick and installs them
//! in the store, overwriting whatever path the object had; empty results are
//! discarded. Workers never touch tick-loop state; every task carries
//! copies of the inputs it needs.
//!
//! Results may arrive for objects that died in the meantime. That is fine:
//! the install simply overwrites a stale entry, the destroyed-object drain
//! erases it, and an update never follows a path for an id with no record.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{unbounded, Receiver, Sender};
use glam::{Vec2, Vec3};
use log::debug;

use realm_shared::pathfinding::find_path;
use realm_shared::{Navmap, ObjectId};

/// One pathfinding request, self-contained so workers stay decoupled from
/// the simulation.
#[derive(Debug, Clone)]
pub struct PathTask {
    pub requester: ObjectId,
    pub start: Vec3,
    pub target: Vec3,
    pub map_origin: Vec2,
    pub scale: f32,
    pub navmap: Arc<Navmap>,
}

#[derive(Debug)]
struct PathOutcome {
    requester: ObjectId,
    waypoints: VecDeque<Vec3>,
}

/// Worker pool plus the per-object waypoint store.
#[derive(Debug)]
pub struct PathService {
    task_tx: Option<Sender<PathTask>>,
    result_rx: Receiver<PathOutcome>,
    paths: HashMap<ObjectId, VecDeque<Vec3>>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl PathService {
    /// Spawns `worker_count` pathfinding threads.
    pub fn new(worker_count: usize) -> Self {
        let (task_tx, task_rx) = unbounded::<PathTask>();
        let (result_tx, result_rx) = unbounded::<PathOutcome>();

        let workers = (0..worker_count.max(1))
            .map(|index| {
                let task_rx = task_rx.clone();
                let result_tx = result_tx.clone();
                thread::Builder::new()
                    .name(format!("pathfinder-{}", index))
                    .spawn(move || worker_loop(task_rx, result_tx))
                    .expect("failed to spawn pathfinder thread")
            })
            .collect();

        Self {
            task_tx: Some(task_tx),
            result_rx,
            paths: HashMap::new(),
            workers,
        }
    }

    /// Service with no worker threads: tasks stay queued forever. Unit tests
    /// use this to observe request traffic deterministically.
    #[cfg(test)]
    pub(crate) fn without_workers() -> Self {
        let (task_tx, task_rx) = unbounded::<PathTask>();
        let (result_tx, result_rx) = unbounded::<PathOutcome>();
        // Leak the idle channel ends so queued tasks stay observable through
        // the sender instead of erroring out.
        std::mem::forget(task_rx);
        std::mem::forget(result_tx);
        Self {
            task_tx: Some(task_tx),
            result_rx,
            paths: HashMap::new(),
            workers: Vec::new(),
        }
    }

    /// Enqueues an asynchronous path computation. The result lands in the
    /// store on a later [`PathService::drain_results`] call.
    pub fn request(&self, task: PathTask) {
        if let Some(tx) = &self.task_tx {
            // Send can only fail after shutdown, when nobody cares.
            let _ = tx.send(task);
        }
    }

    /// Number of tasks waiting for a worker.
    pub fn pending_tasks(&self) -> usize {
        self.task_tx.as_ref().map_or(0, |tx| tx.len())
    }

    /// Installs every finished path. Empty results are discarded; a finished
    /// path replaces any existing one for the same object.
    pub fn drain_results(&mut self) {
        while let Ok(outcome) = self.result_rx.try_recv() {
            if outcome.waypoints.is_empty() {
                debug!("discarding empty path result for object {}", outcome.requester);
                continue;
            }
            self.paths.insert(outcome.requester, outcome.waypoints);
        }
    }

    pub fn has_path(&self, id: ObjectId) -> bool {
        self.paths.contains_key(&id)
    }

    /// Mutable access to an object's waypoint queue.
    pub fn path_mut(&mut self, id: ObjectId) -> Option<&mut VecDeque<Vec3>> {
        self.paths.get_mut(&id)
    }

    pub fn waypoints(&self, id: ObjectId) -> Option<&VecDeque<Vec3>> {
        self.paths.get(&id)
    }

    pub fn clear(&mut self, id: ObjectId) {
        self.paths.remove(&id);
    }

    /// Replaces the object's path with a single waypoint.
    pub fn set_single_target(&mut self, id: ObjectId, waypoint: Vec3) {
        let mut path = VecDeque::with_capacity(1);
        path.push_back(waypoint);
        self.paths.insert(id, path);
    }

    /// Erases the path of an object that left the world.
    pub fn on_object_destroyed(&mut self, id: ObjectId) {
        self.paths.remove(&id);
    }
}

impl Drop for PathService {
    fn drop(&mut self) {
        // Disconnecting the task channel wakes every worker out of recv().
        drop(self.task_tx.take());
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop(task_rx: Receiver<PathTask>, result_tx: Sender<PathOutcome>) {
    while let Ok(task) = task_rx.recv() {
        let waypoints = find_path(
            task.start,
            task.target,
            task.map_origin,
            task.scale,
            &task.navmap,
        );
        if result_tx
            .send(PathOutcome {
                requester: task.requester,
                waypoints,
            })
            .is_err()
        {
            break;
        }
    }
}
