use crate::tensor::Tensor;

/// Adam optimizer (Kingma & Ba, 2015).
///
/// Keeps first and second moment estimates per parameter and applies the
/// bias-corrected update. Parameters without a gradient are skipped, so a
/// partial backward pass is safe.
pub struct Adam {
    params: Vec<Tensor>,
    lr: f32,
    betas: (f32, f32),
    eps: f32,
    weight_decay: f32,
    m: Vec<Vec<f32>>, // 1st moment
    v: Vec<Vec<f32>>, // 2nd moment
    t: usize,         // timestep
}

impl Adam {
    #[must_use]
    pub fn new(
        params: Vec<Tensor>,
        lr: f32,
        betas: (f32, f32),
        eps: f32,
        weight_decay: f32,
    ) -> Self {
        let m: Vec<Vec<f32>> = params
            .iter()
            .map(|p| vec![0.0; p.borrow().data.len()])
            .collect();
        let v: Vec<Vec<f32>> = params
            .iter()
            .map(|p| vec![0.0; p.borrow().data.len()])
            .collect();

        Adam {
            params,
            lr,
            betas,
            eps,
            weight_decay,
            m,
            v,
            t: 0,
        }
    }

    /// Construct with the conventional defaults: betas (0.9, 0.999),
    /// eps 1e-8, no weight decay.
    #[must_use]
    pub fn with_lr(params: Vec<Tensor>, lr: f32) -> Self {
        Self::new(params, lr, (0.9, 0.999), 1e-8, 0.0)
    }

    pub fn zero_grad(&self) {
        for param in &self.params {
            param.borrow_mut().grad = None;
        }
    }

    pub fn step(&mut self) {
        self.t += 1;
        for i in 0..self.params.len() {
            self.step_param(i);
        }
    }

    #[allow(clippy::needless_range_loop)]
    fn step_param(&mut self, i: usize) {
        let param = &self.params[i];
        let mut p = param.borrow_mut();

        let grad = match &p.grad {
            Some(g) => g.clone(),
            None => return,
        };

        // Apply weight decay to gradient
        let mut active_grad = grad;
        if self.weight_decay != 0.0 {
            for (g, theta) in active_grad.iter_mut().zip(p.data.iter()) {
                *g += self.weight_decay * *theta;
            }
        }

        let m = &mut self.m[i];
        let v = &mut self.v[i];

        // Update biased moments
        for j in 0..active_grad.len() {
            m[j] = self.betas.0 * m[j] + (1.0 - self.betas.0) * active_grad[j];
            v[j] = self.betas.1 * v[j] + (1.0 - self.betas.1) * active_grad[j].powi(2);
        }

        // Bias correction
        let m_hat_scale = 1.0 / (1.0 - self.betas.0.powi(self.t as i32));
        let v_hat_scale = 1.0 / (1.0 - self.betas.1.powi(self.t as i32));

        for j in 0..p.data.len() {
            let m_hat = m[j] * m_hat_scale;
            let v_hat = v[j] * v_hat_scale;
            p.data[j] -= self.lr * m_hat / (v_hat.sqrt() + self.eps);
        }
    }
}
