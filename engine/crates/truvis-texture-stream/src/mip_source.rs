use std::collections::HashSet;
use std::time::Duration;

/// mip 数据的来源 (文件、包体、网络……)
///
/// 会在 loader 的线程池中被并发调用。
pub trait MipSource: Send + Sync {
    fn read_mip(&self, texture: &str, level: u32) -> anyhow::Result<Vec<u8>>;
}

/// 生成确定性数据的 mip 来源，用于测试和 demo
///
/// 第 `level` 级 mip 的大小为 `base_size * 4^level` (有上限)，内容全部是 `level`。
#[derive(Debug, Clone)]
pub struct SyntheticMipSource {
    base_size: usize,
    max_size: usize,
    latency: Duration,
    failing: HashSet<(String, u32)>,
}

impl SyntheticMipSource {
    pub fn new(base_size: usize) -> Self {
        Self {
            base_size,
            max_size: 1 << 20,
            latency: Duration::ZERO,
            failing: HashSet::new(),
        }
    }

    /// 每次读取前等待一段时间，模拟慢速 IO
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// 读取指定纹理的指定等级时返回错误
    pub fn with_failing_level(mut self, texture: impl Into<String>, level: u32) -> Self {
        self.failing.insert((texture.into(), level));
        self
    }

    pub fn mip_size(&self, level: u32) -> usize {
        let size = self.base_size.saturating_mul(1usize.checked_shl(2 * level).unwrap_or(usize::MAX));
        size.min(self.max_size)
    }
}

impl MipSource for SyntheticMipSource {
    fn read_mip(&self, texture: &str, level: u32) -> anyhow::Result<Vec<u8>> {
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }
        if self.failing.contains(&(texture.to_string(), level)) {
            anyhow::bail!("mip {} of texture {} is corrupted", level, texture);
        }
        Ok(vec![level as u8; self.mip_size(level)])
    }
}
