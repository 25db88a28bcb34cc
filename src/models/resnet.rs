//! ResNet-18 with torchvision parameter names, so checkpoints exported from
//! a torchvision state dict load without renaming.

use rand::Rng;

use crate::error::Result;
use crate::layers::{BatchNorm2d, Conv2d, Linear, MaxPool2d};
use crate::model::{prefixed, Model, Module};
use crate::Tensor;

/// Two 3x3 convolutions with a residual connection. When the block changes
/// resolution or width the shortcut goes through a 1x1 convolution.
pub struct BasicBlock {
    conv1: Conv2d,
    bn1: BatchNorm2d,
    conv2: Conv2d,
    bn2: BatchNorm2d,
    downsample: Option<(Conv2d, BatchNorm2d)>,
}

impl BasicBlock {
    pub fn with_rng(in_channels: usize, out_channels: usize, stride: usize, rng: &mut impl Rng) -> Self {
        let downsample = (stride != 1 || in_channels != out_channels).then(|| {
            (
                Conv2d::with_rng(in_channels, out_channels, 1, stride, 0, false, rng),
                BatchNorm2d::new(out_channels),
            )
        });
        BasicBlock {
            conv1: Conv2d::with_rng(in_channels, out_channels, 3, stride, 1, false, rng),
            bn1: BatchNorm2d::new(out_channels),
            conv2: Conv2d::with_rng(out_channels, out_channels, 3, 1, 1, false, rng),
            bn2: BatchNorm2d::new(out_channels),
            downsample,
        }
    }

    fn norms(&self) -> impl Iterator<Item = &BatchNorm2d> {
        [&self.bn1, &self.bn2].into_iter().chain(self.downsample.as_ref().map(|(_, bn)| bn))
    }
}

impl Module for BasicBlock {
    fn forward(&self, input: &Tensor) -> Result<Tensor> {
        let mut out = self.bn1.forward(&self.conv1.forward(input)?)?.relu();
        out = self.bn2.forward(&self.conv2.forward(&out)?)?;
        let identity = match self.downsample {
            Some((ref conv, ref bn)) => bn.forward(&conv.forward(input)?)?,
            None => input.clone(),
        };
        Ok(out.add(&identity)?.relu())
    }

    fn named_parameters(&self) -> Vec<(String, Tensor)> {
        let mut params = Vec::new();
        params.extend(prefixed("conv1", self.conv1.named_parameters()));
        params.extend(prefixed("bn1", self.bn1.named_parameters()));
        params.extend(prefixed("conv2", self.conv2.named_parameters()));
        params.extend(prefixed("bn2", self.bn2.named_parameters()));
        if let Some((ref conv, ref bn)) = self.downsample {
            params.extend(prefixed("downsample.0", conv.named_parameters()));
            params.extend(prefixed("downsample.1", bn.named_parameters()));
        }
        params
    }

    fn named_buffers(&self) -> Vec<(String, Tensor)> {
        let mut buffers = Vec::new();
        buffers.extend(prefixed("bn1", self.bn1.named_buffers()));
        buffers.extend(prefixed("bn2", self.bn2.named_buffers()));
        if let Some((_, ref bn)) = self.downsample {
            buffers.extend(prefixed("downsample.1", bn.named_buffers()));
        }
        buffers
    }

    fn set_training(&self, training: bool) {
        for bn in self.norms() {
            bn.set_training(training);
        }
    }
}

pub struct ResNet {
    conv1: Conv2d,
    bn1: BatchNorm2d,
    maxpool: MaxPool2d,
    stages: Vec<Vec<BasicBlock>>,
    fc: Linear,
}

impl ResNet {
    pub fn resnet18(num_classes: usize) -> Self {
        ResNet::resnet18_with_rng(num_classes, &mut rand::thread_rng())
    }

    pub fn resnet18_with_rng(num_classes: usize, rng: &mut impl Rng) -> Self {
        ResNet::with_rng(&[2, 2, 2, 2], num_classes, rng)
    }

    /// Builds a basic-block ResNet with `blocks[i]` blocks in stage `i`.
    /// Stage widths double from 64, and every stage after the first halves
    /// the resolution.
    pub fn with_rng(blocks: &[usize], num_classes: usize, rng: &mut impl Rng) -> Self {
        let conv1 = Conv2d::with_rng(3, 64, 7, 2, 3, false, rng);
        let mut in_channels = 64;
        let mut stages = Vec::with_capacity(blocks.len());
        for (i, &count) in blocks.iter().enumerate() {
            let width = 64 << i;
            let stride = if i == 0 { 1 } else { 2 };
            let mut stage = Vec::with_capacity(count);
            for b in 0..count {
                let block_stride = if b == 0 { stride } else { 1 };
                stage.push(BasicBlock::with_rng(in_channels, width, block_stride, rng));
                in_channels = width;
            }
            stages.push(stage);
        }
        ResNet {
            conv1,
            bn1: BatchNorm2d::new(64),
            maxpool: MaxPool2d::new(3, 2).with_padding(1),
            stages,
            fc: Linear::with_rng(in_channels, num_classes, true, rng),
        }
    }

    pub fn fc(&self) -> &Linear {
        &self.fc
    }

    /// Swaps the classifier head, e.g. to fine-tune a frozen backbone on a
    /// new label set. The new layer's parameters keep their own
    /// `requires_grad` flags.
    pub fn replace_fc(&mut self, fc: Linear) -> Linear {
        std::mem::replace(&mut self.fc, fc)
    }

    fn blocks(&self) -> impl Iterator<Item = (String, &BasicBlock)> {
        self.stages.iter().enumerate().flat_map(|(s, stage)| {
            stage
                .iter()
                .enumerate()
                .map(move |(b, block)| (format!("layer{}.{}", s + 1, b), block))
        })
    }
}

impl Module for ResNet {
    fn forward(&self, input: &Tensor) -> Result<Tensor> {
        let mut x = self.bn1.forward(&self.conv1.forward(input)?)?.relu();
        x = self.maxpool.forward(&x)?;
        for (_, block) in self.blocks() {
            x = block.forward(&x)?;
        }
        x = x.avg_pool2d_global()?.flatten(1)?;
        self.fc.forward(&x)
    }

    fn named_parameters(&self) -> Vec<(String, Tensor)> {
        let mut params = Vec::new();
        params.extend(prefixed("conv1", self.conv1.named_parameters()));
        params.extend(prefixed("bn1", self.bn1.named_parameters()));
        for (name, block) in self.blocks() {
            params.extend(prefixed(&name, block.named_parameters()));
        }
        params.extend(prefixed("fc", self.fc.named_parameters()));
        params
    }

    fn named_buffers(&self) -> Vec<(String, Tensor)> {
        let mut buffers: Vec<(String, Tensor)> = prefixed("bn1", self.bn1.named_buffers()).collect();
        for (name, block) in self.blocks() {
            buffers.extend(prefixed(&name, block.named_buffers()));
        }
        buffers
    }

    fn set_training(&self, training: bool) {
        self.bn1.set_training(training);
        for (_, block) in self.blocks() {
            block.set_training(training);
        }
    }
}

impl Model for ResNet {
    fn name(&self) -> &'static str {
        "resnet18"
    }
}
