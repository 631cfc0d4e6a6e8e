use ndarray::{Array4, ArrayViewD};
use opencv::core::{Mat, Size, BORDER_CONSTANT};
use opencv::imgproc;
use opencv::prelude::*;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::TensorRef;

use super::classifier::{Classifier, ClassifierError, Detection};
use super::frame::{Frame, PixelFormat};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

const YOLO_INPUT_SIZE: usize = 640;
const LETTERBOX_FILL: f64 = 114.0;
const COCO_CLASSES: [&str; 80] = [
    "person",
    "bicycle",
    "car",
    "motorcycle",
    "airplane",
    "bus",
    "train",
    "truck",
    "boat",
    "traffic light",
    "fire hydrant",
    "stop sign",
    "parking meter",
    "bench",
    "bird",
    "cat",
    "dog",
    "horse",
    "sheep",
    "cow",
    "elephant",
    "bear",
    "zebra",
    "giraffe",
    "backpack",
    "umbrella",
    "handbag",
    "tie",
    "suitcase",
    "frisbee",
    "skis",
    "snowboard",
    "sports ball",
    "kite",
    "baseball bat",
    "baseball glove",
    "skateboard",
    "surfboard",
    "tennis racket",
    "bottle",
    "wine glass",
    "cup",
    "fork",
    "knife",
    "spoon",
    "bowl",
    "banana",
    "apple",
    "sandwich",
    "orange",
    "broccoli",
    "carrot",
    "hot dog",
    "pizza",
    "donut",
    "cake",
    "chair",
    "couch",
    "potted plant",
    "bed",
    "dining table",
    "toilet",
    "tv",
    "laptop",
    "mouse",
    "remote",
    "keyboard",
    "cell phone",
    "microwave",
    "oven",
    "toaster",
    "sink",
    "refrigerator",
    "book",
    "clock",
    "vase",
    "scissors",
    "teddy bear",
    "hair drier",
    "toothbrush",
];

/// Object classifier running a YOLO ONNX export through ONNX Runtime.
///
/// Accepts both YOLO26 exports (`logits` + `pred_boxes`) and Ultralytics
/// YOLOv8-style exports (`output0`, `[1, 4 + classes, anchors]`). Boxes are
/// not decoded: the pipeline only needs which labels were seen.
pub struct YoloClassifier {
    session: Session,
    class_names: Vec<String>,
}

impl YoloClassifier {
    pub fn new(model: &str, class_names: Vec<String>, intra_threads: usize) -> Result<Self, BoxError> {
        let builder = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(intra_threads)?;

        let session = if model.starts_with("http://") || model.starts_with("https://") {
            builder.commit_from_url(model)?
        } else {
            builder.commit_from_file(model)?
        };

        let class_names = if class_names.is_empty() {
            COCO_CLASSES.iter().map(|s| s.to_string()).collect()
        } else {
            class_names
        };

        tracing::info!(model = %model, classes = class_names.len(), "object model loaded");

        Ok(Self {
            session,
            class_names,
        })
    }

    fn run(&mut self, frame: &Frame, confidence_threshold: f32) -> Result<Vec<Detection>, BoxError> {
        let input_tensor = preprocess(frame)?;

        let tensor_ref = TensorRef::from_array_view(input_tensor.view())?.into_dyn();
        let outputs = self.session.run(ort::inputs![tensor_ref])?;

        let scores = if let Some(logits) = outputs.get("logits") {
            let logits = logits.try_extract_array::<f32>()?.to_owned();
            best_classes_yolo26(&logits.view())?
        } else if let Some(output) = outputs.get("output0") {
            let output = output.try_extract_array::<f32>()?.to_owned();
            best_classes_yolov8(&output.view())?
        } else {
            return Err(
                "unsupported model format: expected 'logits' (YOLO26) or 'output0' (YOLOv8) output"
                    .into(),
            );
        };
        drop(outputs);

        Ok(scores
            .into_iter()
            .filter(|&(_, score)| score >= confidence_threshold)
            .map(|(class_id, score)| Detection::new(self.label(class_id), score))
            .collect())
    }

    fn label(&self, class_id: usize) -> String {
        self.class_names
            .get(class_id)
            .cloned()
            .unwrap_or_else(|| format!("class_{}", class_id))
    }
}

impl Classifier for YoloClassifier {
    fn name(&self) -> &'static str {
        "yolo"
    }

    fn detect(
        &mut self,
        frame: &Frame,
        confidence_threshold: f32,
    ) -> Result<Vec<Detection>, ClassifierError> {
        self.run(frame, confidence_threshold)
            .map_err(ClassifierError::Inference)
    }
}

/// Letterboxes the frame into a 640x640 RGB tensor scaled to [0, 1].
fn preprocess(frame: &Frame) -> Result<Array4<f32>, BoxError> {
    let channels = frame.format().channels() as i32;
    let mat = Mat::from_slice(frame.data())?;
    let mat = mat.reshape(channels, frame.height() as i32)?.try_clone()?;

    let bgr = match frame.format() {
        PixelFormat::Bgr24 => mat,
        PixelFormat::Gray => {
            let mut bgr = Mat::default();
            imgproc::cvt_color(&mat, &mut bgr, imgproc::COLOR_GRAY2BGR, 0)?;
            bgr
        }
    };

    let rows = frame.height() as f32;
    let cols = frame.width() as f32;
    let input_size = YOLO_INPUT_SIZE as f32;

    let scale = (input_size / cols).min(input_size / rows);
    let new_w = ((cols * scale).round() as i32).max(1);
    let new_h = ((rows * scale).round() as i32).max(1);

    let mut resized = Mat::default();
    imgproc::resize(
        &bgr,
        &mut resized,
        Size::new(new_w, new_h),
        0.0,
        0.0,
        imgproc::INTER_LINEAR,
    )?;

    let pad_x = (YOLO_INPUT_SIZE as i32 - new_w) / 2;
    let pad_y = (YOLO_INPUT_SIZE as i32 - new_h) / 2;

    let mut padded = Mat::default();
    opencv::core::copy_make_border(
        &resized,
        &mut padded,
        pad_y,
        YOLO_INPUT_SIZE as i32 - new_h - pad_y,
        pad_x,
        YOLO_INPUT_SIZE as i32 - new_w - pad_x,
        BORDER_CONSTANT,
        opencv::core::Scalar::new(LETTERBOX_FILL, LETTERBOX_FILL, LETTERBOX_FILL, 0.0),
    )?;

    let mut rgb = Mat::default();
    imgproc::cvt_color(&padded, &mut rgb, imgproc::COLOR_BGR2RGB, 0)?;

    let data = rgb.data_bytes()?;
    if data.len() < YOLO_INPUT_SIZE * YOLO_INPUT_SIZE * 3 {
        return Err("letterboxed frame is smaller than the model input".into());
    }

    let mut tensor = Array4::<f32>::zeros((1, 3, YOLO_INPUT_SIZE, YOLO_INPUT_SIZE));
    for y in 0..YOLO_INPUT_SIZE {
        for x in 0..YOLO_INPUT_SIZE {
            let idx = (y * YOLO_INPUT_SIZE + x) * 3;
            tensor[[0, 0, y, x]] = data[idx] as f32 / 255.0;
            tensor[[0, 1, y, x]] = data[idx + 1] as f32 / 255.0;
            tensor[[0, 2, y, x]] = data[idx + 2] as f32 / 255.0;
        }
    }

    Ok(tensor)
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// YOLO26 `logits`, shape `[1, queries, classes]` or `[queries, classes]`.
/// Returns the best (class, score) per query.
fn best_classes_yolo26(logits: &ArrayViewD<f32>) -> Result<Vec<(usize, f32)>, BoxError> {
    let shape = logits.shape();
    let (queries, classes) = match shape.len() {
        3 => (shape[1], shape[2]),
        2 => (shape[0], shape[1]),
        _ => return Ok(Vec::new()),
    };

    let flat = logits.as_slice().ok_or("logits are not contiguous")?;
    let mut best = Vec::with_capacity(queries);

    for i in 0..queries {
        let row = &flat[i * classes..(i + 1) * classes];
        if let Some((class_id, logit)) = argmax(row) {
            best.push((class_id, sigmoid(logit)));
        }
    }

    Ok(best)
}

/// YOLOv8 `output0`, shape `[1, 4 + classes, anchors]`, class scores already
/// activated. Returns the best (class, score) per anchor.
fn best_classes_yolov8(output: &ArrayViewD<f32>) -> Result<Vec<(usize, f32)>, BoxError> {
    let shape = output.shape();
    if shape.len() != 3 || shape[1] <= 4 {
        return Ok(Vec::new());
    }

    let channels = shape[1];
    let anchors = shape[2];
    let classes = channels - 4;
    let flat = output.as_slice().ok_or("output0 is not contiguous")?;
    let mut best = Vec::with_capacity(anchors);

    for anchor in 0..anchors {
        let mut max_score = f32::MIN;
        let mut max_class = 0;
        for class_id in 0..classes {
            let score = flat[(4 + class_id) * anchors + anchor];
            if score > max_score {
                max_score = score;
                max_class = class_id;
            }
        }
        best.push((max_class, max_score));
    }

    Ok(best)
}

fn argmax(values: &[f32]) -> Option<(usize, f32)> {
    values
        .iter()
        .copied()
        .enumerate()
        .fold(None, |best, (i, v)| match best {
            Some((_, b)) if b >= v => best,
            _ => Some((i, v)),
        })
}
