//! Descriptor validation and status mapping

use crate::lowering::*;
use onnx_xla_compiler::proto::tensor_proto::DataType;
use onnx_xla_compiler::{
    check_compatibility, compile, CompilerError, Event, Executor, HostBuffer, Status, TensorDescriptor,
};

fn add_executor() -> Executor {
    let bytes = OnnxGraphBuilder::new()
        .add_input("a", &[2, 3], DataType::Float)
        .add_input("b", &[2, 3], DataType::Float)
        .add_node("Add", &["a", "b"], &["y"])
        .add_output("y", &[2, 3], DataType::Float)
        .to_bytes();
    compile(&bytes, &[]).unwrap()
}

struct Buffers {
    a: Vec<f32>,
    b: Vec<f32>,
    y: Vec<f32>,
}

impl Buffers {
    fn new() -> Self {
        Self {
            a: range(0.0, 6),
            b: vec![10.0; 6],
            y: vec![0.0; 6],
        }
    }

    fn inputs(&mut self) -> Vec<TensorDescriptor> {
        vec![
            descriptor("a", DataType::Float, &[2, 3], &mut self.a),
            descriptor("b", DataType::Float, &[2, 3], &mut self.b),
        ]
    }

    fn outputs(&mut self) -> Vec<TensorDescriptor> {
        vec![descriptor("y", DataType::Float, &[2, 3], &mut self.y)]
    }
}

#[test]
fn test_count_mismatches() {
    let mut executor = add_executor();
    let mut buffers = Buffers::new();
    let inputs = buffers.inputs();
    let outputs = buffers.outputs();

    let err = executor.init_io(&inputs[..1], &outputs).unwrap_err();
    assert!(matches!(err, CompilerError::UnexpectedCount { what: "inputs", expected: 2, actual: 1 }));
    assert_eq!(err.status(), Status::InvalidSize);

    let mut extra = buffers.inputs();
    extra.push(descriptor("c", DataType::Float, &[2, 3], &mut buffers.y));
    let err = executor.init_io(&extra, &outputs).unwrap_err();
    assert!(matches!(err, CompilerError::UnexpectedCount { what: "inputs", expected: 2, actual: 3 }));

    let err = executor.init_io(&inputs, &[]).unwrap_err();
    assert!(matches!(err, CompilerError::UnexpectedCount { what: "outputs", expected: 1, actual: 0 }));
}

#[test]
fn test_shape_mismatch_on_each_axis() {
    let mut executor = add_executor();
    let mut buffers = Buffers::new();
    let outputs = buffers.outputs();

    for dims in [[3u64, 3], [2, 4], [1, 3]] {
        let inputs = vec![
            descriptor("a", DataType::Float, &dims, &mut buffers.a),
            descriptor("b", DataType::Float, &[2, 3], &mut buffers.b),
        ];
        let err = executor.init_io(&inputs, &outputs).unwrap_err();
        assert!(matches!(err, CompilerError::MismatchingShape { .. }), "{:?}", dims);
        assert_eq!(err.status(), Status::MismatchingShape);
    }

    let rank_three = vec![
        descriptor("a", DataType::Float, &[2, 3, 1], &mut buffers.a),
        descriptor("b", DataType::Float, &[2, 3], &mut buffers.b),
    ];
    let err = executor.init_io(&rank_three, &outputs).unwrap_err();
    assert!(matches!(err, CompilerError::MismatchingShape { .. }));
}

#[test]
fn test_unknown_and_misplaced_names() {
    let mut executor = add_executor();
    let mut buffers = Buffers::new();
    let outputs = buffers.outputs();

    let unknown = vec![
        descriptor("a", DataType::Float, &[2, 3], &mut buffers.a),
        descriptor("nope", DataType::Float, &[2, 3], &mut buffers.b),
    ];
    let err = executor.init_io(&unknown, &outputs).unwrap_err();
    assert_eq!(err.status(), Status::InvalidName);

    // An output name is not accepted as an input.
    let misplaced = vec![
        descriptor("a", DataType::Float, &[2, 3], &mut buffers.a),
        descriptor("y", DataType::Float, &[2, 3], &mut buffers.b),
    ];
    let err = executor.init_io(&misplaced, &outputs).unwrap_err();
    assert_eq!(err.status(), Status::InvalidName);

    let duplicated = vec![
        descriptor("a", DataType::Float, &[2, 3], &mut buffers.a),
        descriptor("a", DataType::Float, &[2, 3], &mut buffers.b),
    ];
    let err = executor.init_io(&duplicated, &outputs).unwrap_err();
    assert_eq!(err.status(), Status::InvalidName);
}

#[test]
fn test_datatype_tag_memory_and_pointer() {
    let mut executor = add_executor();
    let mut buffers = Buffers::new();
    let outputs = buffers.outputs();

    let mut inputs = buffers.inputs();
    inputs[1].data_type = DataType::Double as i32;
    let err = executor.init_io(&inputs, &outputs).unwrap_err();
    assert!(matches!(err, CompilerError::MismatchingDatatype { .. }));
    assert_eq!(err.status(), Status::MismatchingDatatype);

    let mut inputs = buffers.inputs();
    inputs[0].tag = 0xDEAD_BEEF;
    let err = executor.init_io(&inputs, &outputs).unwrap_err();
    assert_eq!(err.status(), Status::UnsupportedTag);

    let mut inputs = buffers.inputs();
    inputs[0].memory_type = 1;
    let err = executor.init_io(&inputs, &outputs).unwrap_err();
    assert_eq!(err.status(), Status::InvalidMemoryType);

    let mut inputs = buffers.inputs();
    inputs[0].buffer = HostBuffer::null();
    let err = executor.init_io(&inputs, &outputs).unwrap_err();
    assert_eq!(err.status(), Status::InvalidPointer);
}

#[test]
fn test_failed_binding_keeps_previous_buffers() {
    let mut executor = add_executor();
    let mut buffers = Buffers::new();
    let inputs = buffers.inputs();
    let outputs = buffers.outputs();
    executor.init_io(&inputs, &outputs).unwrap();

    let mut other_y = vec![0.0f32; 6];
    let bad_outputs = vec![descriptor("y", DataType::Float, &[3, 2], &mut other_y)];
    assert!(executor.init_io(&inputs, &bad_outputs).is_err());

    executor.execute_computation(&Event::signalled(), &Event::new()).unwrap();
    assert_tensors_equal(&buffers.y, &[10.0, 11.0, 12.0, 13.0, 14.0, 15.0], 0.0);
    assert!(other_y.iter().all(|&v| v == 0.0));
}

#[test]
fn test_rebinding_between_runs() {
    let mut executor = add_executor();
    let mut first = Buffers::new();
    executor.init_io(&first.inputs(), &first.outputs()).unwrap();
    executor.execute_computation(&Event::signalled(), &Event::new()).unwrap();

    let mut second = Buffers::new();
    second.b = vec![-1.0; 6];
    executor.init_io(&second.inputs(), &second.outputs()).unwrap();
    executor.execute_computation(&Event::signalled(), &Event::new()).unwrap();

    assert_tensors_equal(&first.y, &[10.0, 11.0, 12.0, 13.0, 14.0, 15.0], 0.0);
    assert_tensors_equal(&second.y, &[-1.0, 0.0, 1.0, 2.0, 3.0, 4.0], 0.0);
}

#[test]
fn test_execute_before_binding_is_invalid_state() {
    let executor = add_executor();
    let output_fence = Event::new();
    let err = executor.execute_computation(&Event::signalled(), &output_fence).unwrap_err();
    assert_eq!(err.status(), Status::InvalidState);
    assert!(!output_fence.is_signalled());
}

#[test]
fn test_signalled_output_fence_is_invalid_state() {
    let mut executor = add_executor();
    let mut buffers = Buffers::new();
    executor.init_io(&buffers.inputs(), &buffers.outputs()).unwrap();
    let err = executor
        .execute_computation(&Event::signalled(), &Event::signalled())
        .unwrap_err();
    assert_eq!(err.status(), Status::InvalidState);
}

#[test]
fn test_bad_bytes_are_invalid_protobuf() {
    let err = compile(&[0xFF, 0xFF, 0xFF, 0x0F], &[]).unwrap_err();
    assert!(matches!(err, CompilerError::InvalidProtobuf(_)));
    assert_eq!(err.status(), Status::InvalidProtobuf);
    assert_eq!(err.status().code(), 0x104);
}

#[test]
fn test_unsupported_operator_status() {
    let bytes = OnnxGraphBuilder::new()
        .add_input("x", &[2, 2], DataType::Float)
        .add_node("Tanh", &["x"], &["y"])
        .add_output("y", &[2, 2], DataType::Float)
        .to_bytes();

    let err = check_compatibility(&bytes).unwrap_err();
    assert_eq!(err.status(), Status::UnsupportedOperator);

    let err = compile(&bytes, &[]).unwrap_err();
    assert_eq!(err.status(), Status::UnsupportedOperator);
    assert_eq!(err.status().code(), 0x203);
}

#[test]
fn test_compatible_model_reports_its_operators() {
    let bytes = OnnxGraphBuilder::new()
        .add_input("x", &[1, 4], DataType::Float)
        .add_node("Relu", &["x"], &["r"])
        .add_node("Softmax", &["r"], &["y"])
        .add_output("y", &[1, 4], DataType::Float)
        .to_bytes();
    let ir = check_compatibility(&bytes).unwrap();
    assert_eq!(ir.operator_kinds(), vec!["Relu", "Softmax"]);
}

#[test]
fn test_weight_errors_surface_from_compile() {
    let mut data = vec![0.0f64; 24];
    let weights = [descriptor("x", DataType::Double, &[2, 3, 4], &mut data)];
    let err = compile(&relu_model(None), &weights).unwrap_err();
    assert_eq!(err.status(), Status::MismatchingDatatype);

    let mut data = vec![0.0f32; 24];
    let weights = [descriptor("x", DataType::Float, &[4, 3, 2], &mut data)];
    let err = compile(&relu_model(None), &weights).unwrap_err();
    assert_eq!(err.status(), Status::MismatchingShape);

    let weights = [descriptor("w", DataType::Float, &[2, 3, 4], &mut data)];
    let err = compile(&relu_model(None), &weights).unwrap_err();
    assert_eq!(err.status(), Status::InvalidName);
}

#[test]
fn test_symbolic_runtime_input_is_unsupported_shape() {
    let bytes = OnnxGraphBuilder::new()
        .add_batched_input("x", "N", &[4], DataType::Float)
        .add_node("Relu", &["x"], &["y"])
        .add_output("y", &[1, 4], DataType::Float)
        .to_bytes();
    let err = compile(&bytes, &[]).unwrap_err();
    assert_eq!(err.status(), Status::UnsupportedShape);
}

#[test]
fn test_symbolic_dim_takes_weight_shape() {
    let bytes = OnnxGraphBuilder::new()
        .add_batched_input("x", "N", &[4], DataType::Float)
        .add_node("Relu", &["x"], &["y"])
        .add_output("y", &[2, 4], DataType::Float)
        .to_bytes();
    let mut data = vec![-1.0f32, 2.0, -3.0, 4.0, 5.0, -6.0, 7.0, -8.0];
    let weights = [descriptor("x", DataType::Float, &[2, 4], &mut data)];
    let mut executor = compile(&bytes, &weights).unwrap();

    let mut y = vec![0.0f32; 8];
    executor
        .init_io(&[], &[descriptor("y", DataType::Float, &[2, 4], &mut y)])
        .unwrap();
    executor.execute_computation(&Event::signalled(), &Event::new()).unwrap();
    assert_tensors_equal(&y, &[0.0, 2.0, 0.0, 4.0, 5.0, 0.0, 7.0, 0.0], 0.0);
}
