use crate::error::{Result, TensorError};
use crate::tensor::{accumulate_grad, Precision, Tensor, TensorOp};

impl Tensor {
    fn image_dims(&self, op: &str) -> Result<(usize, usize, usize, usize)> {
        match self.shape().as_slice() {
            &[batch, channels, height, width] => Ok((batch, channels, height, width)),
            other => Err(TensorError::InvalidArgument(format!("{op} needs a 4d input, got {other:?}"))),
        }
    }

    /// Max pooling over `kernel_size x kernel_size` windows. Padded cells
    /// never win, so padding only widens the border windows.
    pub fn max_pool2d(&self, kernel_size: usize, stride: usize, padding: usize) -> Result<Tensor> {
        let (batch, channels, height, width) = self.image_dims("max_pool2d")?;
        if kernel_size == 0 || stride == 0 {
            return Err(TensorError::InvalidArgument(
                "max_pool2d kernel size and stride must be at least 1".to_string(),
            ));
        }
        if padding * 2 > kernel_size {
            return Err(TensorError::InvalidArgument(format!(
                "max_pool2d padding {padding} must be at most half of kernel size {kernel_size}"
            )));
        }
        let (padded_h, padded_w) = (height + 2 * padding, width + 2 * padding);
        if kernel_size > padded_h || kernel_size > padded_w {
            return Err(TensorError::InvalidArgument(format!(
                "pooling window {kernel_size} does not fit a {height}x{width} input"
            )));
        }

        let out_height = (padded_h - kernel_size) / stride + 1;
        let out_width = (padded_w - kernel_size) / stride + 1;

        let mut result_data = Vec::with_capacity(batch * channels * out_height * out_width);
        let mut max_indices = Vec::with_capacity(batch * channels * out_height * out_width);
        {
            let data_borrow = self.0.borrow();
            let data = &data_borrow.data;
            for b in 0..batch {
                for c in 0..channels {
                    let base = (b * channels + c) * height * width;
                    for oy in 0..out_height {
                        for ox in 0..out_width {
                            let mut max_val = Precision::NEG_INFINITY;
                            let mut max_idx = None;
                            for ky in 0..kernel_size {
                                let Some(y) = (oy * stride + ky).checked_sub(padding).filter(|y| *y < height) else {
                                    continue;
                                };
                                for kx in 0..kernel_size {
                                    let Some(x) = (ox * stride + kx).checked_sub(padding).filter(|x| *x < width)
                                    else {
                                        continue;
                                    };
                                    let idx = base + y * width + x;
                                    if max_idx.is_none() || data[idx] > max_val {
                                        max_val = data[idx];
                                        max_idx = Some(idx);
                                    }
                                }
                            }
                            // padding <= kernel / 2 guarantees a real cell in every window
                            let idx = max_idx.unwrap_or(base);
                            result_data.push(data[idx]);
                            max_indices.push(idx);
                        }
                    }
                }
            }
        }

        let input = self.0.clone();
        let input_len = batch * channels * height * width;
        Ok(Tensor::from_op(
            result_data,
            vec![batch, channels, out_height, out_width],
            &[self],
            TensorOp::MaxPool2d,
            move |grad| {
                let mut contribution = vec![0.0; input_len];
                for (i, g) in grad.iter().enumerate() {
                    contribution[max_indices[i]] += g;
                }
                accumulate_grad(&input, &contribution);
            },
        ))
    }

    /// Averages every channel plane down to a single value: `[N, C, H, W]`
    /// becomes `[N, C, 1, 1]`.
    pub fn avg_pool2d_global(&self) -> Result<Tensor> {
        let (batch, channels, height, width) = self.image_dims("avg_pool2d_global")?;
        let plane = height * width;
        if plane == 0 {
            return Err(TensorError::InvalidArgument("cannot average an empty plane".to_string()));
        }
        let result_data: Vec<Precision> = self.with_data(|data| {
            data.chunks(plane)
                .map(|p| p.iter().sum::<Precision>() / plane as Precision)
                .collect()
        });

        let input = self.0.clone();
        Ok(Tensor::from_op(
            result_data,
            vec![batch, channels, 1, 1],
            &[self],
            TensorOp::AvgPool2d,
            move |grad| {
                let contribution: Vec<Precision> = grad
                    .iter()
                    .flat_map(|g| std::iter::repeat(g / plane as Precision).take(plane))
                    .collect();
                accumulate_grad(&input, &contribution);
            },
        ))
    }
}
