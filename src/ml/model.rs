//! 衣類分類用のResNetモデル
//!
//! ボトルネックブロックを積み重ねた標準的なResNet構成です。
//! 本番は ResNet-50（`[3, 4, 6, 3]`、幅64）を使い、最終の全結合層だけをクラス数に合わせて差し替えます。

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        loss::CrossEntropyLossConfig,
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, Linear, LinearConfig, PaddingConfig2d, Relu,
    },
    tensor::{backend::Backend, Int, Tensor},
    train::ClassificationOutput,
};

/// ボトルネックの出力チャネル倍率
pub const EXPANSION: usize = 4;

/// ResNet-50 のステージ構成
pub const RESNET50_LAYERS: [usize; 4] = [3, 4, 6, 3];

/// ImageNet事前学習済みヘッドのクラス数
pub const IMAGENET_CLASSES: usize = 1000;

/// モデル設定
#[derive(Config, Debug)]
pub struct ResNetConfig {
    /// 各ステージのブロック数
    pub layers: [usize; 4],
    /// 分類クラス数
    pub num_classes: usize,
    /// 最初のステージの幅
    #[config(default = 64)]
    pub base_width: usize,
}

impl ResNetConfig {
    /// 全結合層に入る特徴次元
    pub fn feature_dim(&self) -> usize {
        self.base_width * 8 * EXPANSION
    }

    /// モデルを初期化
    pub fn init<B: Backend>(&self, device: &B::Device) -> ResNet<B> {
        let width = self.base_width;
        let mut in_channels = width;

        let mut stage = |planes: usize, blocks: usize, stride: usize| {
            let stage = make_stage(in_channels, planes, blocks, stride, device);
            in_channels = planes * EXPANSION;
            stage
        };

        let layer1 = stage(width, self.layers[0], 1);
        let layer2 = stage(width * 2, self.layers[1], 2);
        let layer3 = stage(width * 4, self.layers[2], 2);
        let layer4 = stage(width * 8, self.layers[3], 2);

        ResNet {
            conv1: Conv2dConfig::new([3, width], [7, 7])
                .with_stride([2, 2])
                .with_padding(PaddingConfig2d::Explicit(3, 3))
                .with_bias(false)
                .init(device),
            bn1: BatchNormConfig::new(width).init(device),
            maxpool: MaxPool2dConfig::new([3, 3])
                .with_strides([2, 2])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(),
            layer1,
            layer2,
            layer3,
            layer4,
            avgpool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            fc: LinearConfig::new(self.feature_dim(), self.num_classes).init(device),
            activation: Relu::new(),
        }
    }
}

fn make_stage<B: Backend>(
    in_channels: usize,
    planes: usize,
    blocks: usize,
    stride: usize,
    device: &B::Device,
) -> Vec<Bottleneck<B>> {
    let out_channels = planes * EXPANSION;
    let mut stage = Vec::with_capacity(blocks.max(1));

    // 先頭ブロックだけが解像度とチャネル数を変える
    let downsample = (stride != 1 || in_channels != out_channels).then(|| Downsample {
        conv: Conv2dConfig::new([in_channels, out_channels], [1, 1])
            .with_stride([stride, stride])
            .with_bias(false)
            .init(device),
        bn: BatchNormConfig::new(out_channels).init(device),
    });
    stage.push(Bottleneck::new(in_channels, planes, stride, downsample, device));

    for _ in 1..blocks.max(1) {
        stage.push(Bottleneck::new(out_channels, planes, 1, None, device));
    }

    stage
}

/// ショートカット経路の 1x1 畳み込み
#[derive(Module, Debug)]
pub struct Downsample<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B>,
}

impl<B: Backend> Downsample<B> {
    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.bn.forward(self.conv.forward(x))
    }
}

/// 1x1 → 3x3 → 1x1 のボトルネックブロック
#[derive(Module, Debug)]
pub struct Bottleneck<B: Backend> {
    conv1: Conv2d<B>,
    bn1: BatchNorm<B>,
    conv2: Conv2d<B>,
    bn2: BatchNorm<B>,
    conv3: Conv2d<B>,
    bn3: BatchNorm<B>,
    downsample: Option<Downsample<B>>,
    activation: Relu,
}

impl<B: Backend> Bottleneck<B> {
    fn new(
        in_channels: usize,
        planes: usize,
        stride: usize,
        downsample: Option<Downsample<B>>,
        device: &B::Device,
    ) -> Self {
        let out_channels = planes * EXPANSION;
        Self {
            conv1: Conv2dConfig::new([in_channels, planes], [1, 1])
                .with_bias(false)
                .init(device),
            bn1: BatchNormConfig::new(planes).init(device),
            conv2: Conv2dConfig::new([planes, planes], [3, 3])
                .with_stride([stride, stride])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .with_bias(false)
                .init(device),
            bn2: BatchNormConfig::new(planes).init(device),
            conv3: Conv2dConfig::new([planes, out_channels], [1, 1])
                .with_bias(false)
                .init(device),
            bn3: BatchNormConfig::new(out_channels).init(device),
            downsample,
            activation: Relu::new(),
        }
    }

    fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let identity = match &self.downsample {
            Some(downsample) => downsample.forward(input.clone()),
            None => input.clone(),
        };

        let x = self.activation.forward(self.bn1.forward(self.conv1.forward(input)));
        let x = self.activation.forward(self.bn2.forward(self.conv2.forward(x)));
        let x = self.bn3.forward(self.conv3.forward(x));

        self.activation.forward(x + identity)
    }
}

/// 衣類分類用ResNet
///
/// # アーキテクチャ
/// - Conv 7x7 stride 2 + BN + ReLU + MaxPool 3x3 stride 2
/// - ボトルネック x 4ステージ（stride 1, 2, 2, 2）
/// - Global Average Pooling
/// - FC: feature_dim -> num_classes
#[derive(Module, Debug)]
pub struct ResNet<B: Backend> {
    conv1: Conv2d<B>,
    bn1: BatchNorm<B>,
    maxpool: MaxPool2d,
    layer1: Vec<Bottleneck<B>>,
    layer2: Vec<Bottleneck<B>>,
    layer3: Vec<Bottleneck<B>>,
    layer4: Vec<Bottleneck<B>>,
    avgpool: AdaptiveAvgPool2d,
    fc: Linear<B>,
    activation: Relu,
}

impl<B: Backend> ResNet<B> {
    /// 順伝播
    ///
    /// # 引数
    /// - `images`: バッチ画像 [batch_size, 3, 224, 224]
    ///
    /// # 戻り値
    /// - クラスごとのロジット [batch_size, num_classes]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.conv1.forward(images);
        let x = self.activation.forward(self.bn1.forward(x));
        let x = self.maxpool.forward(x);

        let x = self
            .layer1
            .iter()
            .chain(&self.layer2)
            .chain(&self.layer3)
            .chain(&self.layer4)
            .fold(x, |x, block| block.forward(x));

        let x = self.avgpool.forward(x);
        let [batch_size, channels, _, _] = x.dims();
        let x = x.reshape([batch_size, channels]);

        self.fc.forward(x)
    }

    /// 順伝播と損失計算（学習用）
    pub fn forward_classification(
        &self,
        images: Tensor<B, 4>,
        targets: Tensor<B, 1, Int>,
    ) -> ClassificationOutput<B> {
        let output = self.forward(images);
        let loss = CrossEntropyLossConfig::new()
            .init(&output.device())
            .forward(output.clone(), targets.clone());

        ClassificationOutput::new(loss, output, targets)
    }

    /// 出力層のクラス数
    pub fn num_classes(&self) -> usize {
        let [_, d_output] = self.fc.weight.dims();
        d_output
    }

    /// バックボーンを保ったまま全結合層を新しいクラス数で初期化し直す
    ///
    /// 事前学習済みの重みから転移学習するときに使います。
    pub fn with_num_classes(mut self, num_classes: usize, device: &B::Device) -> Self {
        let [d_input, _] = self.fc.weight.dims();
        self.fc = LinearConfig::new(d_input, num_classes).init(device);
        self
    }
}
