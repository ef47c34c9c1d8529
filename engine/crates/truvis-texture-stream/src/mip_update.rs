use crate::mip_loader::{LoadResult, MipLoadRequest, MipLoader};
use crate::streamed_texture::{StreamedTexture, TextureHandle, TextureTable};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use truvis_asset_update::context::ExecutionContext;
use truvis_asset_update::step::{Step, StepContext};
use truvis_asset_update::task::AssetUpdateTask;

/// 更新方式
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum MipUpdateKind {
    /// reallocate (Primary) -> lock (Primary) -> load (Worker) -> finalize (Primary)
    InPlace,
    /// allocate (Primary) -> load (Worker) -> create (Worker) -> finalize (Primary)
    Recreate,
    /// 只丢弃精细的 mip: finalize (Primary)
    Shrink,
}

impl MipUpdateKind {
    pub fn choose(resident_levels: u32, requested_levels: u32, in_place: bool) -> Self {
        if requested_levels <= resident_levels {
            Self::Shrink
        } else if in_place {
            Self::InPlace
        } else {
            Self::Recreate
        }
    }
}

/// 一次 mip 更新在各个 step 之间共享的数据
///
/// 纹理本身只通过 `TextureHandle` 间接引用，只有 Primary 上的 step 能解析它。
pub struct MipUpdate {
    texture: TextureHandle,
    name: Arc<str>,
    /// 更新开始时的常驻等级
    resident_levels: u32,

    table: Arc<TextureTable>,
    loader: Arc<MipLoader>,

    /// 第 i 项对应第 `resident_levels + i` 级 mip
    staging: Mutex<Vec<Option<Vec<u8>>>>,
    /// 重建时从旧资源复制出来的 mip
    retained: Mutex<Vec<Vec<u8>>>,

    /// 置位后尚未开始的读取会被跳过
    abort: Arc<AtomicBool>,
}

// new & init
impl MipUpdate {
    pub fn new(
        texture: TextureHandle,
        name: Arc<str>,
        resident_levels: u32,
        table: Arc<TextureTable>,
        loader: Arc<MipLoader>,
    ) -> Arc<Self> {
        Arc::new(Self {
            texture,
            name,
            resident_levels,
            table,
            loader,
            staging: Mutex::new(Vec::new()),
            retained: Mutex::new(Vec::new()),
            abort: Arc::new(AtomicBool::new(false)),
        })
    }

    /// 第一个 step 与配对的取消 step
    pub fn first_steps(self: &Arc<Self>, kind: MipUpdateKind) -> (Step, Step) {
        let update = self.clone();
        let first = match kind {
            MipUpdateKind::InPlace => Step::primary(move |ctx| update.reallocate(ctx)),
            MipUpdateKind::Recreate => Step::primary(move |ctx| update.allocate(ctx)),
            MipUpdateKind::Shrink => Step::primary(move |ctx| update.shrink(ctx)),
        };
        (first, self.cancel_step())
    }

    /// 尽快跳过尚未开始的读取
    pub fn abort(&self) {
        self.abort.store(true, Ordering::SeqCst);
    }
}
// in-place chain
impl MipUpdate {
    fn reallocate(self: Arc<Self>, ctx: StepContext) {
        let requested = ctx.requested_level();
        let found = self.with_texture(&ctx, |texture| {
            texture.begin_update(requested);
            texture.reserve_levels(requested);
        });
        if found.is_none() {
            return self.abandon(ctx);
        }

        let update = self.clone();
        ctx.set_gate(0);
        ctx.push_step(Some(Step::primary(move |ctx| update.lock(ctx))), Some(self.cancel_step()));
    }

    fn lock(self: Arc<Self>, ctx: StepContext) {
        self.reset_staging(ctx.requested_level());

        let update = self.clone();
        let finalize = Step::primary(move |ctx| update.finalize_in_place(ctx));
        let update = self.clone();
        ctx.set_gate(0);
        ctx.push_step(
            Some(Step::worker(move |ctx| update.load(ctx, finalize))),
            Some(self.cancel_step()),
        );
    }

    fn finalize_in_place(self: Arc<Self>, ctx: StepContext) {
        let Some(mips) = self.take_staged() else {
            ctx.task().request_cancel();
            return self.cancel(ctx);
        };

        let count = mips.len();
        if self.with_texture(&ctx, |texture| texture.append_levels(mips)).is_none() {
            return self.abandon(ctx);
        }
        log::info!(
            "texture {} streamed in place to {} levels (+{})",
            self.name,
            ctx.requested_level(),
            count
        );
        ctx.finish();
    }
}
// recreate chain
impl MipUpdate {
    fn allocate(self: Arc<Self>, ctx: StepContext) {
        let requested = ctx.requested_level();
        let resident = self.resident_levels;
        let retained = self.with_texture(&ctx, |texture| {
            texture.begin_update(requested);
            texture.clone_levels(resident)
        });
        let Some(retained) = retained else {
            return self.abandon(ctx);
        };

        *lock(&self.retained) = retained;
        self.reset_staging(requested);

        let update = self.clone();
        let create = Step::worker(move |ctx| update.create(ctx));
        let update = self.clone();
        ctx.set_gate(0);
        ctx.push_step(
            Some(Step::worker(move |ctx| update.load(ctx, create))),
            Some(self.cancel_step()),
        );
    }

    fn create(self: Arc<Self>, ctx: StepContext) {
        let Some(staged) = self.take_staged() else {
            ctx.task().request_cancel();
            return ctx.push_step(None, Some(self.cancel_step()));
        };

        let mut chain = std::mem::take(&mut *lock(&self.retained));
        chain.extend(staged);
        debug_assert_eq!(chain.len(), ctx.requested_level() as usize);

        // 新的 mip 链随 step 一起移交给 Primary；走取消链时随 step 一起丢弃
        let update = self.clone();
        ctx.set_gate(0);
        ctx.push_step(
            Some(Step::primary(move |ctx| update.finalize_recreate(ctx, chain))),
            Some(self.cancel_step()),
        );
    }

    fn finalize_recreate(self: Arc<Self>, ctx: StepContext, chain: Vec<Vec<u8>>) {
        let generation = self.with_texture(&ctx, |texture| {
            texture.replace_levels(chain);
            texture.generation()
        });
        let Some(generation) = generation else {
            return self.abandon(ctx);
        };
        log::info!(
            "texture {} recreated with {} levels (generation {})",
            self.name,
            ctx.requested_level(),
            generation
        );
        ctx.finish();
    }
}
// shared steps
impl MipUpdate {
    /// 为每个缺失的等级发起一次读取，gate 等于读取数量
    fn load(self: Arc<Self>, ctx: StepContext, next: Step) {
        debug_assert_eq!(ctx.context(), ExecutionContext::Worker);

        let levels = self.resident_levels..ctx.requested_level();
        ctx.set_gate(levels.len() as i32);
        log::debug!("texture {} loading mips {:?}", self.name, levels);

        for level in levels {
            let update = self.clone();
            let task = ctx.task().clone();
            self.loader.request_load(MipLoadRequest {
                texture: self.name.clone(),
                level,
                abort: self.abort.clone(),
                on_complete: Box::new(move |result| {
                    update.on_loaded(&task, level, result);
                    task.gate().decrement();
                }),
            });
        }

        ctx.push_step(Some(next), Some(self.cancel_step()));
    }

    fn shrink(self: Arc<Self>, ctx: StepContext) {
        let requested = ctx.requested_level();
        if self.with_texture(&ctx, |texture| texture.truncate_levels(requested)).is_none() {
            return self.abandon(ctx);
        }
        log::info!("texture {} dropped to {} levels", self.name, requested);
        ctx.finish();
    }

    fn cancel(self: Arc<Self>, ctx: StepContext) {
        self.abort();
        lock(&self.staging).clear();
        lock(&self.retained).clear();

        // 纹理可能已经被注销
        let _ = self.with_texture(&ctx, StreamedTexture::abort_update);
        log::info!(
            "texture {} update to {} levels cancelled, keeping {} levels",
            self.name,
            ctx.requested_level(),
            self.resident_levels
        );
        ctx.finish();
    }

    fn cancel_step(self: &Arc<Self>) -> Step {
        let update = self.clone();
        Step::primary(move |ctx| update.cancel(ctx))
    }

    /// 资源已经不可用: 当作隐式取消，终止任务
    fn abandon(&self, ctx: StepContext) {
        log::warn!("texture {} is no longer available, abandoning update", self.name);
        self.abort();
        ctx.task().request_cancel();
        ctx.finish();
    }
}
// tools
impl MipUpdate {
    fn with_texture<R>(&self, ctx: &StepContext, f: impl FnOnce(&mut StreamedTexture) -> R) -> Option<R> {
        let Some(token) = ctx.primary() else {
            log::error!("texture {} touched outside of the primary context", self.name);
            return None;
        };
        self.table.with_mut(token, |textures| textures.get_mut(self.texture).map(f))
    }

    fn reset_staging(&self, requested: u32) {
        let count = requested.saturating_sub(self.resident_levels) as usize;
        *lock(&self.staging) = vec![None; count];
    }

    /// 所有等级都已加载时取出数据
    fn take_staged(&self) -> Option<Vec<Vec<u8>>> {
        let staged = std::mem::take(&mut *lock(&self.staging));
        staged.into_iter().collect()
    }

    fn on_loaded(&self, task: &AssetUpdateTask, level: u32, result: LoadResult) {
        match result {
            LoadResult::Loaded(bytes) => {
                let index = (level - self.resident_levels) as usize;
                if let Some(slot) = lock(&self.staging).get_mut(index) {
                    *slot = Some(bytes);
                }
            }
            LoadResult::Skipped => {}
            LoadResult::Failed(err) => {
                log::warn!("texture {} mip {} failed ({}), cancelling update", self.name, level, err);
                task.request_cancel();
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
