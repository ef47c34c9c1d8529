use crate::mip_loader::{MipLoader, MipLoaderConfig};
use crate::mip_source::MipSource;
use crate::mip_update::{MipUpdate, MipUpdateKind};
use crate::streamed_texture::{StreamedTexture, TextureHandle, TextureTable};
use anyhow::Context;
use slotmap::{SecondaryMap, SlotMap};
use std::sync::Arc;
use std::time::Duration;
use truvis_asset_update::manager::{AssetUpdateManager, FinishedUpdate, UpdateHandle};
use truvis_asset_update::scheduler::TaskScheduler;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum StreamStatus {
    Missing,
    Idle { resident_levels: u32 },
    Updating { resident_levels: u32, target_levels: u32 },
}

struct ActiveUpdate {
    handle: UpdateHandle,
    target_levels: u32,
    update: Arc<MipUpdate>,
}

/// 纹理流式加载 (Facade)
///
/// 在 Primary 线程上创建和驱动。每个纹理同一时刻最多只有一个更新。
pub struct TextureStreamer {
    // 必须先于 loader 销毁: manager 的 Drop 会等待所有任务结束
    manager: AssetUpdateManager,

    textures: Arc<TextureTable>,
    loader: Arc<MipLoader>,

    updates: SecondaryMap<TextureHandle, ActiveUpdate>,
}
// new & init
impl TextureStreamer {
    pub fn new(
        scheduler: Arc<TaskScheduler>,
        source: Arc<dyn MipSource>,
        loader_config: MipLoaderConfig,
    ) -> anyhow::Result<Self> {
        let manager = AssetUpdateManager::new(scheduler)?;
        let loader = MipLoader::new(source, loader_config)?;
        Ok(Self {
            manager,
            textures: Arc::new(TextureTable::new(SlotMap::with_key())),
            loader: Arc::new(loader),
            updates: SecondaryMap::new(),
        })
    }
}
// textures
impl TextureStreamer {
    pub fn register_texture(&mut self, name: impl Into<String>, total_levels: u32, in_place: bool) -> TextureHandle {
        let texture = StreamedTexture::new(name, total_levels, in_place);
        self.textures.with_mut(self.manager.token(), |textures| textures.insert(texture))
    }

    /// 正在进行的更新会被取消，它的 step 发现纹理已经不存在时会直接结束
    pub fn unregister_texture(&mut self, texture: TextureHandle) -> bool {
        self.cancel(texture);
        let removed = self.textures.with_mut(self.manager.token(), |textures| textures.remove(texture));
        if let Some(removed) = &removed {
            log::info!("texture {} unregistered", removed.name());
        }
        removed.is_some()
    }

    pub fn with_texture<R>(&self, texture: TextureHandle, f: impl FnOnce(&StreamedTexture) -> R) -> Option<R> {
        self.textures.with(self.manager.token(), |textures| textures.get(texture).map(f))
    }

    #[inline]
    pub fn resident_levels(&self, texture: TextureHandle) -> Option<u32> {
        self.with_texture(texture, StreamedTexture::resident_levels)
    }

    pub fn status(&self, texture: TextureHandle) -> StreamStatus {
        let Some(resident_levels) = self.resident_levels(texture) else {
            return StreamStatus::Missing;
        };
        match self.updates.get(texture) {
            Some(active) => StreamStatus::Updating {
                resident_levels,
                target_levels: active.target_levels,
            },
            None => StreamStatus::Idle { resident_levels },
        }
    }

    #[inline]
    pub fn texture_count(&self) -> usize {
        self.textures.with(self.manager.token(), |textures| textures.len())
    }
}
// streaming
impl TextureStreamer {
    /// 请求把纹理的常驻等级调整到 `levels`
    ///
    /// 等级会被限制在纹理的总等级内；已经是目标等级时返回 `None`。
    pub fn request_levels(&mut self, texture: TextureHandle, levels: u32) -> anyhow::Result<Option<UpdateHandle>> {
        let (name, resident, total, in_place) = self
            .with_texture(texture, |t| (Arc::<str>::from(t.name()), t.resident_levels(), t.total_levels(), t.in_place()))
            .with_context(|| format!("unknown texture {:?}", texture))?;

        if self.updates.contains_key(texture) {
            anyhow::bail!("texture {} already has an update in flight", name);
        }

        let levels = levels.min(total);
        if levels == resident {
            return Ok(None);
        }

        let kind = MipUpdateKind::choose(resident, levels, in_place);
        let update = MipUpdate::new(texture, name.clone(), resident, self.textures.clone(), self.loader.clone());
        let (first, cancel) = update.first_steps(kind);
        let handle = self.manager.start(levels, Some(first), Some(cancel));

        log::debug!("texture {} {:?} update: {} -> {} levels", name, kind, resident, levels);
        self.updates.insert(
            texture,
            ActiveUpdate {
                handle,
                target_levels: levels,
                update,
            },
        );
        Ok(Some(handle))
    }

    pub fn cancel(&mut self, texture: TextureHandle) -> bool {
        let Some(active) = self.updates.get(texture) else {
            return false;
        };
        active.update.abort();
        self.manager.cancel(active.handle)
    }

    pub fn cancel_pending(&mut self) {
        for active in self.updates.values() {
            active.update.abort();
        }
        self.manager.cancel_all();
    }

    /// 每帧调用一次，返回本帧结束的更新
    pub fn update(&mut self) -> Vec<(TextureHandle, FinishedUpdate)> {
        let finished = self.manager.update();
        finished
            .into_iter()
            .filter_map(|finished| {
                let texture = self
                    .updates
                    .iter()
                    .find(|(_, active)| active.handle == finished.handle)
                    .map(|(texture, _)| texture)?;
                self.updates.remove(texture);
                Some((texture, finished))
            })
            .collect()
    }

    pub fn block_till_idle(&mut self, timeout: Duration) -> anyhow::Result<Vec<(TextureHandle, FinishedUpdate)>> {
        let deadline = std::time::Instant::now() + timeout;

        let mut finished = Vec::new();
        loop {
            finished.extend(self.update());
            if self.updates.is_empty() {
                return Ok(finished);
            }
            if std::time::Instant::now() >= deadline {
                anyhow::bail!("{} texture updates still in flight after {:?}", self.updates.len(), timeout);
            }
            std::thread::sleep(Duration::from_micros(200));
        }
    }

    #[inline]
    pub fn pending_count(&self) -> usize {
        self.updates.len()
    }

    #[inline]
    pub fn manager(&self) -> &AssetUpdateManager {
        &self.manager
    }
}

impl Drop for TextureStreamer {
    fn drop(&mut self) {
        // 跳过尚未开始的读取，manager 的 Drop 负责等待任务结束
        for active in self.updates.values() {
            active.update.abort();
        }
    }
}
