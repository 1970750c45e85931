// src/ransac.rs

//! 通用 RANSAC。
//!
//! 为模型实现 [`Estimator`]，再用 [`ransac`] 在数据上搜索一致集。
//! 随机数由固定种子生成，同样的输入总得到同样的结果。

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

#[derive(Debug, Clone)]
pub struct RansacOptions {
    pub max_iters: usize,
    /// 内点残差阈值，单位与 [`Estimator::residual`] 一致
    pub thresh: f64,
    pub min_inliers: usize,
    pub seed: u64,
    /// 找到候选模型后是否用全部内点重新拟合
    pub refit_on_inliers: bool,
}

impl Default for RansacOptions {
    fn default() -> Self {
        Self {
            max_iters: 200,
            thresh: 15.0,
            min_inliers: 4,
            seed: 1_234_567,
            refit_on_inliers: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RansacResult<M> {
    /// 最佳模型；没有满足 `min_inliers` 的候选时为 `None`
    pub model: Option<M>,
    pub inliers: Vec<usize>,
    /// 内点残差的均方根
    pub inlier_rms: f64,
    /// 找到最佳模型时的迭代序号
    pub iters: usize,
}

impl<M> Default for RansacResult<M> {
    fn default() -> Self {
        Self {
            model: None,
            inliers: Vec::new(),
            inlier_rms: f64::INFINITY,
            iters: 0,
        }
    }
}

impl<M> RansacResult<M> {
    pub fn success(&self) -> bool {
        self.model.is_some()
    }
}

/// RANSAC 可用的模型估计器。
///
/// 估计器本身可以携带上下文（例如相机内参），所以方法都以 `&self` 调用。
pub trait Estimator {
    type Datum;
    type Model;

    /// 拟合一个模型所需的最少样本数
    const MIN_SAMPLES: usize;

    /// 用 `sample` 指定的数据拟合模型，退化或失败时返回 `None`
    fn fit(&self, data: &[Self::Datum], sample: &[usize]) -> Option<Self::Model>;

    /// 单个数据的非负残差
    fn residual(&self, model: &Self::Model, datum: &Self::Datum) -> f64;

    fn is_degenerate(&self, _data: &[Self::Datum], _sample: &[usize]) -> bool {
        false
    }

    /// 在全部内点上重新拟合，默认不做
    fn refit(&self, _data: &[Self::Datum], _inliers: &[usize]) -> Option<Self::Model> {
        None
    }
}

fn rms(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::INFINITY;
    }
    (values.iter().map(|v| v * v).sum::<f64>() / values.len() as f64).sqrt()
}

fn collect_inliers<E: Estimator>(
    estimator: &E,
    model: &E::Model,
    data: &[E::Datum],
    thresh: f64,
) -> (Vec<usize>, Vec<f64>) {
    let mut inliers = Vec::new();
    let mut residuals = Vec::new();
    for (i, datum) in data.iter().enumerate() {
        let r = estimator.residual(model, datum);
        if r <= thresh {
            inliers.push(i);
            residuals.push(r);
        }
    }
    (inliers, residuals)
}

/// 运行 RANSAC。
///
/// 内点更多的模型更好；内点数相同时内点 RMS 更小者更好。
///
/// # 参数
/// * `estimator` - 模型估计器。
/// * `data` - 全部数据。
/// * `opts` - 迭代次数、阈值与随机种子。
///
/// # 返回值
/// 最佳的 [`RansacResult`]；数据不足或没有一致集时 `model` 为 `None`。
pub fn ransac<E: Estimator>(estimator: &E, data: &[E::Datum], opts: &RansacOptions) -> RansacResult<E::Model> {
    let mut best = RansacResult::default();
    if data.len() < E::MIN_SAMPLES {
        return best;
    }

    let all_indices: Vec<usize> = (0..data.len()).collect();
    let mut rng = StdRng::seed_from_u64(opts.seed);
    let mut sample = vec![0usize; E::MIN_SAMPLES];

    for iter in 1..=opts.max_iters {
        for (slot, &idx) in sample
            .iter_mut()
            .zip(all_indices.choose_multiple(&mut rng, E::MIN_SAMPLES))
        {
            *slot = idx;
        }

        if estimator.is_degenerate(data, &sample) {
            continue;
        }
        let Some(mut model) = estimator.fit(data, &sample) else {
            continue;
        };

        let (mut inliers, mut residuals) = collect_inliers(estimator, &model, data, opts.thresh);
        if inliers.len() < opts.min_inliers {
            continue;
        }

        if opts.refit_on_inliers {
            if let Some(refined) = estimator.refit(data, &inliers) {
                let (refined_inliers, refined_residuals) =
                    collect_inliers(estimator, &refined, data, opts.thresh);
                if refined_inliers.len() >= inliers.len() {
                    model = refined;
                    inliers = refined_inliers;
                    residuals = refined_residuals;
                }
            }
        }

        let inlier_rms = rms(&residuals);
        let better = best.model.is_none()
            || inliers.len() > best.inliers.len()
            || (inliers.len() == best.inliers.len() && inlier_rms < best.inlier_rms);
        if better {
            best = RansacResult {
                model: Some(model),
                inliers,
                inlier_rms,
                iters: iter,
            };
        }
    }
    best
}
