//! Whole-graph execution through host buffers and fences

use crate::lowering::*;
use onnx_xla_compiler::proto::tensor_proto::DataType;
use onnx_xla_compiler::proto::TensorProto;
use onnx_xla_compiler::utils::data_type_from_code;
use onnx_xla_compiler::{compile, Event};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[test]
fn test_relu_runtime_input() {
    let mut executor = compile(&relu_model(None), &[]).unwrap();
    assert_eq!(executor.input_names(), ["x".to_string()]);
    assert_eq!(executor.output_names(), ["y".to_string()]);

    let mut x = relu_input();
    let mut y = vec![f32::NAN; 24];
    executor
        .init_io(
            &[descriptor("x", DataType::Float, &[2, 3, 4], &mut x)],
            &[descriptor("y", DataType::Float, &[2, 3, 4], &mut y)],
        )
        .unwrap();

    let (input_fence, output_fence) = (Event::signalled(), Event::new());
    executor.execute_computation(&input_fence, &output_fence).unwrap();
    assert!(output_fence.is_signalled());
    assert_tensors_equal(&y, &relu_expected(), 0.0);
}

#[test]
fn test_relu_initializer_is_constant() {
    let mut executor = compile(&relu_model(Some(relu_input())), &[]).unwrap();
    assert_eq!(executor.input_count(), 0);

    let mut y = vec![0.0f32; 24];
    executor
        .init_io(&[], &[descriptor("y", DataType::Float, &[2, 3, 4], &mut y)])
        .unwrap();
    executor.execute_computation(&Event::signalled(), &Event::new()).unwrap();
    assert_tensors_equal(&y, &relu_expected(), 0.0);
}

#[test]
fn test_relu_weight_descriptor_is_constant() {
    let mut weight = relu_input();
    let weights = [descriptor("x", DataType::Float, &[2, 3, 4], &mut weight)];
    let mut executor = compile(&relu_model(None), &weights).unwrap();
    assert_eq!(executor.input_count(), 0);

    // The weight was copied at translation time.
    weight.iter_mut().for_each(|v| *v = -100.0);

    let mut y = vec![0.0f32; 24];
    executor
        .init_io(&[], &[descriptor("y", DataType::Float, &[2, 3, 4], &mut y)])
        .unwrap();
    executor.execute_computation(&Event::signalled(), &Event::new()).unwrap();
    assert_tensors_equal(&y, &relu_expected(), 0.0);
}

#[test]
fn test_execution_waits_for_input_fence() {
    let mut executor = compile(&relu_model(None), &[]).unwrap();
    let mut x = relu_input();
    let mut y = vec![0.0f32; 24];
    executor
        .init_io(
            &[descriptor("x", DataType::Float, &[2, 3, 4], &mut x)],
            &[descriptor("y", DataType::Float, &[2, 3, 4], &mut y)],
        )
        .unwrap();

    let input_fence = Arc::new(Event::new());
    let signaller = {
        let input_fence = Arc::clone(&input_fence);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            input_fence.signal().unwrap();
        })
    };

    let output_fence = Event::new();
    executor.execute_computation(&input_fence, &output_fence).unwrap();
    signaller.join().unwrap();
    assert!(output_fence.is_signalled());
    assert_tensors_equal(&y, &relu_expected(), 0.0);
}

#[test]
fn test_repeated_runs_reuse_bindings() {
    let mut executor = compile(&relu_model(None), &[]).unwrap();
    let mut x = vec![-1.0f32; 24];
    let mut y = vec![0.0f32; 24];
    executor
        .init_io(
            &[descriptor("x", DataType::Float, &[2, 3, 4], &mut x)],
            &[descriptor("y", DataType::Float, &[2, 3, 4], &mut y)],
        )
        .unwrap();

    executor.execute_computation(&Event::signalled(), &Event::new()).unwrap();
    assert!(y.iter().all(|&v| v == 0.0));

    // Bound buffers are read afresh on every run.
    x.fill(3.0);
    executor.execute_computation(&Event::signalled(), &Event::new()).unwrap();
    assert!(y.iter().all(|&v| v == 3.0));
}

/// conv -> relu -> global average pool -> reshape -> gemm
#[test]
fn test_small_cnn_pipeline() {
    let bytes = OnnxGraphBuilder::new()
        .add_input("x", &[1, 1, 3, 3], DataType::Float)
        .add_float_initializer("w", &[2, 1, 2, 2], vec![1.0; 8])
        .add_float_initializer("b", &[2], vec![0.0, -10.0])
        .add_int64_initializer("shape", &[2], vec![1, -1])
        .add_float_initializer("fc_w", &[2, 1], vec![1.0, 1.0])
        .add_float_initializer("fc_b", &[1], vec![0.5])
        .add_ints_attribute("kernel_shape", &[2, 2])
        .add_node("Conv", &["x", "w", "b"], &["conv"])
        .add_node("Relu", &["conv"], &["relu"])
        .add_node("GlobalAveragePool", &["relu"], &["pooled"])
        .add_node("Reshape", &["pooled", "shape"], &["flat"])
        .add_node("Gemm", &["flat", "fc_w", "fc_b"], &["y"])
        .add_output("y", &[1, 1], DataType::Float)
        .to_bytes();

    let mut executor = compile(&bytes, &[]).unwrap();
    assert_eq!(executor.input_names(), ["x".to_string()]);
    let metadata = executor.metadata("y").unwrap();
    assert_eq!(metadata.dims, vec![1, 1]);

    let mut x = vec![1.0f32; 9];
    let mut y = vec![0.0f32; 1];
    executor
        .init_io(
            &[descriptor("x", DataType::Float, &[1, 1, 3, 3], &mut x)],
            &[descriptor("y", DataType::Float, &[1, 1], &mut y)],
        )
        .unwrap();
    executor.execute_computation(&Event::signalled(), &Event::new()).unwrap();

    // Channel 0 pools to 4, channel 1 is clamped to 0 by the relu.
    assert_tensors_equal(&y, &[4.5], 1e-6);
}

#[test]
fn test_softmax_rows_sum_to_one() {
    let bytes = OnnxGraphBuilder::new()
        .add_input("x", &[3, 4], DataType::Float)
        .add_node("Softmax", &["x"], &["y"])
        .add_output("y", &[3, 4], DataType::Float)
        .to_bytes();
    let mut executor = compile(&bytes, &[]).unwrap();

    let mut x = range(-5.0, 12);
    let mut y = vec![0.0f32; 12];
    executor
        .init_io(
            &[descriptor("x", DataType::Float, &[3, 4], &mut x)],
            &[descriptor("y", DataType::Float, &[3, 4], &mut y)],
        )
        .unwrap();
    executor.execute_computation(&Event::signalled(), &Event::new()).unwrap();

    for row in y.chunks(4) {
        assert!((row.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        assert!(row.windows(2).all(|pair| pair[0] < pair[1]));
    }
}

#[test]
fn test_multiple_outputs_in_declaration_order() {
    let bytes = OnnxGraphBuilder::new()
        .add_input("a", &[4], DataType::Float)
        .add_input("b", &[4], DataType::Float)
        .add_node("Sub", &["a", "b"], &["diff"])
        .add_node("Add", &["a", "b"], &["total"])
        .add_output("total", &[4], DataType::Float)
        .add_output("diff", &[4], DataType::Float)
        .to_bytes();
    let mut executor = compile(&bytes, &[]).unwrap();
    assert_eq!(executor.output_names(), ["total".to_string(), "diff".to_string()]);

    let (mut a, mut b) = (range(1.0, 4), vec![1.0f32; 4]);
    let (mut total, mut diff) = (vec![0.0f32; 4], vec![0.0f32; 4]);
    // Descriptors may come in any order; they are matched by name.
    executor
        .init_io(
            &[
                descriptor("b", DataType::Float, &[4], &mut b),
                descriptor("a", DataType::Float, &[4], &mut a),
            ],
            &[
                descriptor("diff", DataType::Float, &[4], &mut diff),
                descriptor("total", DataType::Float, &[4], &mut total),
            ],
        )
        .unwrap();
    executor.execute_computation(&Event::signalled(), &Event::new()).unwrap();

    assert_tensors_equal(&total, &[2.0, 3.0, 4.0, 5.0], 0.0);
    assert_tensors_equal(&diff, &[0.0, 1.0, 2.0, 3.0], 0.0);
}

fn identity_model(tensor: TensorProto) -> Vec<u8> {
    let data_type = data_type_from_code(tensor.data_type).unwrap();
    let dims = tensor.dims.clone();
    OnnxGraphBuilder::new()
        .add_initializer(tensor)
        .add_node("Identity", &["c"], &["y"])
        .add_output("y", &dims, data_type)
        .to_bytes()
}

fn run_identity<T: Copy + Default>(tensor: TensorProto, count: usize) -> Vec<T> {
    let data_type = data_type_from_code(tensor.data_type).unwrap();
    let dims: Vec<u64> = tensor.dims.iter().map(|&d| d as u64).collect();
    let mut executor = compile(&identity_model(tensor), &[]).unwrap();
    let mut y = vec![T::default(); count];
    executor.init_io(&[], &[descriptor("y", data_type, &dims, &mut y)]).unwrap();
    executor.execute_computation(&Event::signalled(), &Event::new()).unwrap();
    y
}

fn int32_tensor(data_type: DataType, values: &[i32]) -> TensorProto {
    TensorProto {
        name: "c".to_string(),
        dims: vec![values.len() as i64],
        data_type: data_type as i32,
        int32_data: values.to_vec(),
        ..Default::default()
    }
}

#[test]
fn test_narrow_integers_widen_to_int32_buffers() {
    let values = [0, 1, 7, 100];
    for data_type in [DataType::Int8, DataType::Int16, DataType::Int32, DataType::Uint8, DataType::Uint16] {
        let out: Vec<i32> = run_identity(int32_tensor(data_type, &values), 4);
        assert_eq!(out, values, "{:?}", data_type);
    }

    let negatives: Vec<i32> = run_identity(int32_tensor(DataType::Int8, &[-1, -128]), 2);
    assert_eq!(negatives, [-1, -128]);
}

#[test]
fn test_bool_widens_to_int32_buffer() {
    let out: Vec<i32> = run_identity(int32_tensor(DataType::Bool, &[1, 0, 1]), 3);
    assert_eq!(out, [1, 0, 1]);
}

#[test]
fn test_unsigned_widen_to_uint64_buffers() {
    for data_type in [DataType::Uint32, DataType::Uint64] {
        let tensor = TensorProto {
            name: "c".to_string(),
            dims: vec![3],
            data_type: data_type as i32,
            uint64_data: vec![0, 42, 4_000_000_000],
            ..Default::default()
        };
        let out: Vec<u64> = run_identity(tensor, 3);
        assert_eq!(out, [0, 42, 4_000_000_000], "{:?}", data_type);
    }
}

#[test]
fn test_wide_types_keep_their_width() {
    let int64 = TensorProto {
        name: "c".to_string(),
        dims: vec![2],
        data_type: DataType::Int64 as i32,
        int64_data: vec![i64::MIN, i64::MAX],
        ..Default::default()
    };
    assert_eq!(run_identity::<i64>(int64, 2), [i64::MIN, i64::MAX]);

    let double = TensorProto {
        name: "c".to_string(),
        dims: vec![2],
        data_type: DataType::Double as i32,
        double_data: vec![0.1, -2.5],
        ..Default::default()
    };
    assert_eq!(run_identity::<f64>(double, 2), [0.1, -2.5]);

    let float = TensorProto {
        name: "c".to_string(),
        dims: vec![2, 1],
        data_type: DataType::Float as i32,
        raw_data: [1.5f32, -0.25].iter().flat_map(|v| v.to_le_bytes()).collect(),
        ..Default::default()
    };
    assert_eq!(run_identity::<f32>(float, 2), [1.5, -0.25]);
}

#[test]
fn test_float16_widens_numerically_to_int32_buffer() {
    let out: Vec<i32> = run_identity(int32_tensor(DataType::Float16, &[1, 2, -3, 0]), 4);
    assert_eq!(out, [1, 2, -3, 0]);

    // raw_data carries IEEE half bit patterns: 1.0, -2.0
    let raw = TensorProto {
        name: "c".to_string(),
        dims: vec![2],
        data_type: DataType::Float16 as i32,
        raw_data: [0x3C00u16, 0xC000].iter().flat_map(|v| v.to_le_bytes()).collect(),
        ..Default::default()
    };
    assert_eq!(run_identity::<i32>(raw, 2), [1, -2]);
}

#[test]
fn test_complex64_keeps_real_and_imaginary_parts() {
    let tensor = TensorProto {
        name: "c".to_string(),
        dims: vec![2],
        data_type: DataType::Complex64 as i32,
        float_data: vec![1.0, 2.0, -3.0, 4.5],
        ..Default::default()
    };
    let out: Vec<[f32; 2]> = run_identity(tensor, 2);
    assert_eq!(out, [[1.0, 2.0], [-3.0, 4.5]]);
}
