//! 纹理 mip 流式加载
//!
//! 在 `truvis-asset-update` 之上定义具体的 step 链:
//! - 原地更新: reallocate -> lock -> load -> finalize
//! - 重建更新: allocate -> load -> create -> finalize
//!
//! 真实的 GPU 资源和文件读取由 [`streamed_texture::StreamedTexture`] 与
//! [`mip_source::MipSource`] 模拟。

pub mod mip_loader;
pub mod mip_source;
pub mod mip_update;
pub mod streamed_texture;
pub mod texture_streamer;
