use crate::error::{Result, TensorError};
use crate::ops::linalg::{gemm, gemm_a_bt, gemm_at_b};
use crate::tensor::{accumulate_grad, wants_grad, Precision, Tensor, TensorOp};

/// Geometry of one 2d convolution over a single image.
#[derive(Debug, Clone, Copy)]
struct ConvGeometry {
    channels: usize,
    height: usize,
    width: usize,
    kernel_h: usize,
    kernel_w: usize,
    stride: usize,
    padding: usize,
    out_h: usize,
    out_w: usize,
}

impl ConvGeometry {
    fn patch_len(&self) -> usize {
        self.channels * self.kernel_h * self.kernel_w
    }

    fn out_len(&self) -> usize {
        self.out_h * self.out_w
    }

    /// Position inside the unpadded image for output pixel `(oy, ox)` and
    /// kernel tap `(ky, kx)`, or `None` when it falls into the zero padding.
    fn source(&self, oy: usize, ox: usize, ky: usize, kx: usize) -> Option<(usize, usize)> {
        let y = (oy * self.stride + ky).checked_sub(self.padding)?;
        let x = (ox * self.stride + kx).checked_sub(self.padding)?;
        (y < self.height && x < self.width).then_some((y, x))
    }
}

/// Unfolds one `[C, H, W]` image into `[C * KH * KW, OH * OW]` columns.
fn im2col(image: &[Precision], g: &ConvGeometry) -> Vec<Precision> {
    let out_len = g.out_len();
    let mut cols = vec![0.0; g.patch_len() * out_len];
    for c in 0..g.channels {
        let plane = &image[c * g.height * g.width..(c + 1) * g.height * g.width];
        for ky in 0..g.kernel_h {
            for kx in 0..g.kernel_w {
                let row = (c * g.kernel_h + ky) * g.kernel_w + kx;
                let col_row = &mut cols[row * out_len..(row + 1) * out_len];
                for oy in 0..g.out_h {
                    for ox in 0..g.out_w {
                        if let Some((y, x)) = g.source(oy, ox, ky, kx) {
                            col_row[oy * g.out_w + ox] = plane[y * g.width + x];
                        }
                    }
                }
            }
        }
    }
    cols
}

/// Folds column gradients back onto the image, summing overlapping taps.
fn col2im(cols: &[Precision], g: &ConvGeometry, image_grad: &mut [Precision]) {
    let out_len = g.out_len();
    for c in 0..g.channels {
        let plane_offset = c * g.height * g.width;
        for ky in 0..g.kernel_h {
            for kx in 0..g.kernel_w {
                let row = (c * g.kernel_h + ky) * g.kernel_w + kx;
                let col_row = &cols[row * out_len..(row + 1) * out_len];
                for oy in 0..g.out_h {
                    for ox in 0..g.out_w {
                        if let Some((y, x)) = g.source(oy, ox, ky, kx) {
                            image_grad[plane_offset + y * g.width + x] += col_row[oy * g.out_w + ox];
                        }
                    }
                }
            }
        }
    }
}

impl Tensor {
    /// 2d cross-correlation of an `[N, C, H, W]` input with `[O, C, KH, KW]`
    /// weights and an optional `[O]` bias, producing `[N, O, OH, OW]` with
    /// `OH = (H + 2 * padding - KH) / stride + 1`.
    pub fn conv2d(&self, weight: &Tensor, bias: Option<&Tensor>, stride: usize, padding: usize) -> Result<Tensor> {
        let input_shape = self.shape();
        let weight_shape = weight.shape();
        let (&[batch, channels, height, width], &[out_channels, weight_channels, kernel_h, kernel_w]) =
            (input_shape.as_slice(), weight_shape.as_slice())
        else {
            return Err(TensorError::InvalidArgument(format!(
                "conv2d needs a 4d input and 4d weight, got {input_shape:?} and {weight_shape:?}"
            )));
        };
        if channels != weight_channels {
            return Err(TensorError::ShapeMismatch {
                op: "conv2d",
                expected: vec![batch, weight_channels, height, width],
                got: input_shape,
            });
        }
        if let Some(bias) = bias {
            if bias.shape() != [out_channels] {
                return Err(TensorError::ShapeMismatch {
                    op: "conv2d bias",
                    expected: vec![out_channels],
                    got: bias.shape(),
                });
            }
        }
        if stride == 0 {
            return Err(TensorError::InvalidArgument("conv2d stride must be at least 1".to_string()));
        }
        let (padded_h, padded_w) = (height + 2 * padding, width + 2 * padding);
        if kernel_h == 0 || kernel_w == 0 || kernel_h > padded_h || kernel_w > padded_w {
            return Err(TensorError::InvalidArgument(format!(
                "kernel {kernel_h}x{kernel_w} does not fit a {height}x{width} input with padding {padding}"
            )));
        }

        let g = ConvGeometry {
            channels,
            height,
            width,
            kernel_h,
            kernel_w,
            stride,
            padding,
            out_h: (padded_h - kernel_h) / stride + 1,
            out_w: (padded_w - kernel_w) / stride + 1,
        };
        let image_len = channels * height * width;
        let (patch_len, out_len) = (g.patch_len(), g.out_len());

        let mut columns = Vec::with_capacity(batch);
        let mut result_data = Vec::with_capacity(batch * out_channels * out_len);
        {
            let input = self.0.borrow();
            let w = weight.0.borrow();
            let b = bias.map(|b| b.0.borrow());
            for n in 0..batch {
                let cols = im2col(&input.data[n * image_len..(n + 1) * image_len], &g);
                let mut out = gemm(&w.data, &cols, out_channels, patch_len, out_len);
                if let Some(ref b) = b {
                    for (o, plane) in out.chunks_mut(out_len).enumerate() {
                        plane.iter_mut().for_each(|v| *v += b.data[o]);
                    }
                }
                result_data.extend_from_slice(&out);
                columns.push(cols);
            }
        }

        let input_node = self.0.clone();
        let weight_node = weight.0.clone();
        let bias_node = bias.map(|b| b.0.clone());
        let mut parents = vec![self, weight];
        parents.extend(bias);

        Ok(Tensor::from_op(
            result_data,
            vec![batch, out_channels, g.out_h, g.out_w],
            &parents,
            TensorOp::Conv2d,
            move |grad| {
                let per_image = out_channels * out_len;
                if wants_grad(&weight_node) {
                    let mut grad_w = vec![0.0; out_channels * patch_len];
                    for (n, cols) in columns.iter().enumerate() {
                        let g_n = &grad[n * per_image..(n + 1) * per_image];
                        // dW = G_n * cols^T
                        let contribution = gemm_a_bt(g_n, cols, out_channels, out_len, patch_len);
                        grad_w.iter_mut().zip(&contribution).for_each(|(a, c)| *a += c);
                    }
                    accumulate_grad(&weight_node, &grad_w);
                }
                if let Some(ref bias_node) = bias_node {
                    if wants_grad(bias_node) {
                        let mut grad_b = vec![0.0; out_channels];
                        for g_n in grad.chunks(per_image) {
                            for (o, plane) in g_n.chunks(out_len).enumerate() {
                                grad_b[o] += plane.iter().sum::<Precision>();
                            }
                        }
                        accumulate_grad(bias_node, &grad_b);
                    }
                }
                if wants_grad(&input_node) {
                    let mut grad_input = vec![0.0; batch * image_len];
                    {
                        let w = weight_node.borrow();
                        for n in 0..batch {
                            let g_n = &grad[n * per_image..(n + 1) * per_image];
                            // dcols = W^T * G_n
                            let dcols = gemm_at_b(&w.data, g_n, out_channels, patch_len, out_len);
                            col2im(&dcols, &g, &mut grad_input[n * image_len..(n + 1) * image_len]);
                        }
                    }
                    accumulate_grad(&input_node, &grad_input);
                }
            },
        ))
    }
}
