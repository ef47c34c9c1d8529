use slotmap::{SlotMap, new_key_type};
use truvis_asset_update::primary_only::PrimaryOnly;

new_key_type! { pub struct TextureHandle; }

/// 所有纹理，只有 Primary 上下文可以访问
pub type TextureTable = PrimaryOnly<SlotMap<TextureHandle, StreamedTexture>>;

/// 模拟的流式纹理
///
/// `resident` 中第 i 项是第 i 级 mip 的数据，常驻等级 = `resident.len()`。
/// 等级从最粗糙的 mip 开始计数，提高等级就是加载更精细的 mip。
#[derive(Debug)]
pub struct StreamedTexture {
    name: String,
    total_levels: u32,
    resident: Vec<Vec<u8>>,

    /// 正在进行的更新的目标等级
    pending_levels: Option<u32>,
    /// 是否支持原地扩容；否则每次更新都重建资源
    in_place: bool,
    /// 每次重建资源加一
    generation: u32,
}

// new & init
impl StreamedTexture {
    pub fn new(name: impl Into<String>, total_levels: u32, in_place: bool) -> Self {
        Self {
            name: name.into(),
            total_levels,
            resident: Vec::new(),
            pending_levels: None,
            in_place,
            generation: 0,
        }
    }
}
// update
impl StreamedTexture {
    pub(crate) fn begin_update(&mut self, levels: u32) {
        debug_assert!(self.pending_levels.is_none(), "texture {} already updating", self.name);
        self.pending_levels = Some(levels);
    }

    /// 为原地更新预留空间
    pub(crate) fn reserve_levels(&mut self, levels: u32) {
        let additional = (levels as usize).saturating_sub(self.resident.len());
        self.resident.reserve_exact(additional);
    }

    /// 追加新加载的 mip (原地更新)
    pub(crate) fn append_levels(&mut self, mips: Vec<Vec<u8>>) {
        self.resident.extend(mips);
        self.pending_levels = None;
    }

    /// 用新创建的 mip 链替换当前资源 (重建更新)
    pub(crate) fn replace_levels(&mut self, mips: Vec<Vec<u8>>) {
        self.resident = mips;
        self.generation += 1;
        self.pending_levels = None;
    }

    pub(crate) fn truncate_levels(&mut self, levels: u32) {
        self.resident.truncate(levels as usize);
        self.pending_levels = None;
    }

    pub(crate) fn abort_update(&mut self) {
        self.pending_levels = None;
    }

    /// 复制最粗糙的 `levels` 级 mip，重建资源时使用
    pub(crate) fn clone_levels(&self, levels: u32) -> Vec<Vec<u8>> {
        self.resident.iter().take(levels as usize).cloned().collect()
    }
}
// getters
impl StreamedTexture {
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn total_levels(&self) -> u32 {
        self.total_levels
    }

    #[inline]
    pub fn resident_levels(&self) -> u32 {
        self.resident.len() as u32
    }

    #[inline]
    pub fn pending_levels(&self) -> Option<u32> {
        self.pending_levels
    }

    #[inline]
    pub fn is_updating(&self) -> bool {
        self.pending_levels.is_some()
    }

    #[inline]
    pub fn in_place(&self) -> bool {
        self.in_place
    }

    #[inline]
    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn mip(&self, level: u32) -> Option<&[u8]> {
        self.resident.get(level as usize).map(Vec::as_slice)
    }

    pub fn resident_bytes(&self) -> usize {
        self.resident.iter().map(Vec::len).sum()
    }
}
