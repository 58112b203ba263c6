use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::backend::{GpuBackend, TargetFormat, TextureDesc, WorkgroupLimits};

/// Backend that hands out counted handles instead of GPU textures.
#[derive(Debug, Default, Clone)]
pub struct MockBackend {
    pub live: Arc<AtomicUsize>,
    pub peak: Arc<AtomicUsize>,
    pub created: Arc<AtomicUsize>,
    pub unsupported: Vec<(TargetFormat, u32)>,
    pub limits: WorkgroupLimits,
}

impl MockBackend {
    pub fn rejecting(format: TargetFormat, samples: u32) -> Self {
        Self {
            unsupported: vec![(format, samples)],
            ..Self::default()
        }
    }

    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub struct MockTexture {
    pub desc: TextureDesc,
    live: Arc<AtomicUsize>,
}

impl Drop for MockTexture {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

impl GpuBackend for MockBackend {
    type Texture = MockTexture;

    fn create_texture(&self, desc: &TextureDesc) -> MockTexture {
        let now = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.created.fetch_add(1, Ordering::SeqCst);
        MockTexture {
            desc: *desc,
            live: Arc::clone(&self.live),
        }
    }

    fn supports_format(&self, format: TargetFormat, samples: u32) -> bool {
        !self.unsupported.contains(&(format, samples))
    }

    fn workgroup_limits(&self) -> WorkgroupLimits {
        self.limits
    }
}
