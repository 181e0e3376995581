//! Background asset loading.
//!
//! Decoding and parsing run on worker threads. Each result lands in an
//! [`AssetSlot`] with one locked swap; the frame loop takes it at the start of
//! a frame and replaces the GPU resource it feeds. GPU calls never leave the
//! frame thread.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;

use headset_core::AssetPaths;
use headset_render::{mesh, RenderError, RenderResult, TextureImage};

/// A single-value mailbox between a loader thread and the frame loop.
#[derive(Debug)]
pub struct AssetSlot<T> {
    value: Arc<Mutex<Option<RenderResult<T>>>>,
}

impl<T> Clone for AssetSlot<T> {
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
        }
    }
}

impl<T> Default for AssetSlot<T> {
    fn default() -> Self {
        Self {
            value: Arc::new(Mutex::new(None)),
        }
    }
}

impl<T> AssetSlot<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a load result, replacing one not yet taken.
    pub fn publish(&self, result: RenderResult<T>) {
        let mut guard = self.value.lock().unwrap_or_else(PoisonError::into_inner);
        if guard.replace(result).is_some() {
            log::debug!("asset slot overwritten before it was taken");
        }
    }

    /// Removes the published result, if any.
    pub fn take(&self) -> Option<RenderResult<T>> {
        self.value
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Whether a result is waiting.
    pub fn is_ready(&self) -> bool {
        self.value
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl<T: Send + 'static> AssetSlot<T> {
    /// Runs `load` on a named worker thread and publishes its result here.
    ///
    /// If the thread cannot be spawned the load runs inline.
    pub fn spawn(
        &self,
        name: &str,
        load: impl FnOnce() -> RenderResult<T> + Send + 'static,
    ) -> Option<JoinHandle<()>> {
        let slot = self.clone();
        let load = Arc::new(Mutex::new(Some(load)));
        let worker_load = Arc::clone(&load);
        let spawned = std::thread::Builder::new()
            .name(format!("asset loader: {name}"))
            .spawn(move || {
                let load = worker_load
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .take();
                if let Some(load) = load {
                    slot.publish(load());
                }
            });
        match spawned {
            Ok(handle) => Some(handle),
            Err(e) => {
                log::warn!("could not spawn loader for {name}, loading inline: {e}");
                let load = load.lock().unwrap_or_else(PoisonError::into_inner).take();
                if let Some(load) = load {
                    self.publish(load());
                }
                None
            }
        }
    }
}

/// Asset loads started for one render session.
#[derive(Debug, Default)]
pub struct PendingAssets {
    pub hand_open_mesh: Option<AssetSlot<Vec<f32>>>,
    pub hand_closed_mesh: Option<AssetSlot<Vec<f32>>>,
    pub controller_texture: Option<AssetSlot<TextureImage>>,
    pub ground_texture: Option<AssetSlot<TextureImage>>,
    workers: Vec<JoinHandle<()>>,
}

fn start<T: Send + 'static>(
    workers: &mut Vec<JoinHandle<()>>,
    path: Option<&Path>,
    load: fn(PathBuf) -> RenderResult<T>,
) -> Option<AssetSlot<T>> {
    let path = path?.to_path_buf();
    let slot = AssetSlot::new();
    log::debug!("loading {} in the background", path.display());
    let name = path.display().to_string();
    if let Some(handle) = slot.spawn(&name, move || load(path)) {
        workers.push(handle);
    }
    Some(slot)
}

fn load_mesh(path: PathBuf) -> RenderResult<Vec<f32>> {
    mesh::load_obj(&path).map_err(|e| match e {
        RenderError::Mesh(msg) => RenderError::Mesh(format!("{}: {msg}", path.display())),
        other => other,
    })
}

fn load_image(path: PathBuf) -> RenderResult<TextureImage> {
    TextureImage::from_file(path)
}

impl PendingAssets {
    /// Starts a load for every configured path.
    pub fn start(paths: &AssetPaths) -> Self {
        let mut workers = Vec::new();
        let hand_open_mesh = start(&mut workers, paths.hand_open_mesh.as_deref(), load_mesh);
        let hand_closed_mesh = start(&mut workers, paths.hand_closed_mesh.as_deref(), load_mesh);
        let controller_texture =
            start(&mut workers, paths.controller_texture.as_deref(), load_image);
        let ground_texture = start(&mut workers, paths.ground_texture.as_deref(), load_image);
        Self {
            hand_open_mesh,
            hand_closed_mesh,
            controller_texture,
            ground_texture,
            workers,
        }
    }

    /// Whether no load was started or every started load has been taken.
    pub fn is_idle(&self) -> bool {
        self.hand_open_mesh.is_none()
            && self.hand_closed_mesh.is_none()
            && self.controller_texture.is_none()
            && self.ground_texture.is_none()
    }

    /// Blocks until every worker has published.
    pub fn wait(&mut self) {
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                log::warn!("asset loader thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_take_empties() {
        let slot: AssetSlot<u32> = AssetSlot::new();
        assert!(slot.take().is_none());
        slot.publish(Ok(3));
        assert!(slot.is_ready());
        assert_eq!(slot.take().unwrap().unwrap(), 3);
        assert!(slot.take().is_none());
    }

    #[test]
    fn test_spawned_load_publishes() {
        let slot: AssetSlot<Vec<f32>> = AssetSlot::new();
        let handle = slot.spawn("test", || Ok(vec![1.0; 5])).unwrap();
        handle.join().unwrap();
        assert_eq!(slot.take().unwrap().unwrap().len(), 5);
    }

    #[test]
    fn test_missing_file_publishes_error() {
        let mut pending = PendingAssets::start(&AssetPaths {
            hand_open_mesh: Some(PathBuf::from("/nonexistent/hand.obj")),
            ..AssetPaths::default()
        });
        pending.wait();
        let slot = pending.hand_open_mesh.as_ref().unwrap();
        assert!(slot.take().unwrap().is_err());
        assert!(pending.controller_texture.is_none());
    }

    #[test]
    fn test_no_paths_no_loads() {
        let pending = PendingAssets::start(&AssetPaths::default());
        assert!(pending.is_idle());
    }
}
