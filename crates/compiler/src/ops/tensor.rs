//! Layout and pass-through ops: Concat, Reshape, Transpose, Unsqueeze,
//! Identity, Dropout

use super::{normalize_axis, reject_used_output};
use crate::ir::Node;
use crate::registry::{LoweringContext, OperatorRegistry};
use crate::utils::{resolve_reshape, unsqueeze_dims};
use crate::{CompilerError, Result};

pub(super) fn register(registry: &mut OperatorRegistry) {
    registry.register("Concat", concat);
    registry.register("Reshape", reshape);
    registry.register("Transpose", transpose);
    registry.register("Unsqueeze", unsqueeze);
    registry.register("Identity", identity);
    registry.register("Dropout", dropout);
}

fn concat(node: &Node, ctx: &mut LoweringContext<'_>) -> Result<()> {
    let axis = node.require_int("axis")?;
    let rank = ctx.static_input_shape(node, 0)?.len();
    if rank == 0 {
        return Err(CompilerError::InvalidModel(format!(
            "Concat node '{}' cannot join scalars",
            node.name
        )));
    }
    let axis = normalize_axis(node, "axis", axis, rank, rank - 1)?;
    let operands = (0..node.inputs.len())
        .filter_map(|i| ctx.optional_input(node, i).transpose())
        .collect::<Result<Vec<_>>>()?;
    let y = ctx.builder.concat_in_dim(&operands, axis as i64);
    ctx.bind_output(node, 0, y)
}

/// Only a constant target shape can be lowered, since output dims are
/// fixed when the computation is built.
fn reshape(node: &Node, ctx: &mut LoweringContext<'_>) -> Result<()> {
    let Some(target) = ctx.input_literal(node, 1) else {
        return Err(CompilerError::UnsupportedVersion(format!(
            "Reshape node '{}': shape must be a constant",
            node.name
        )));
    };
    let requested = target.to_i64_vec()?;
    let x = ctx.input(node, 0)?;
    let x_dims = ctx.static_input_shape(node, 0)?;
    let dims = resolve_reshape(&x_dims, &requested)?;
    let y = ctx.builder.reshape(x, &dims);
    ctx.bind_output(node, 0, y)
}

fn transpose(node: &Node, ctx: &mut LoweringContext<'_>) -> Result<()> {
    let x = ctx.input(node, 0)?;
    let rank = ctx.static_input_shape(node, 0)?.len();
    if rank == 0 {
        return Err(CompilerError::InvalidModel(format!(
            "Transpose node '{}' has a scalar input",
            node.name
        )));
    }
    let permutation = match node.ints("perm")? {
        Some(perm) => perm.to_vec(),
        None => (0..rank as i64).rev().collect(),
    };
    let y = ctx.builder.transpose(x, &permutation);
    ctx.bind_output(node, 0, y)
}

fn unsqueeze(node: &Node, ctx: &mut LoweringContext<'_>) -> Result<()> {
    let axes = node.require_ints("axes")?;
    let x = ctx.input(node, 0)?;
    let x_dims = ctx.static_input_shape(node, 0)?;
    let dims = unsqueeze_dims(&x_dims, axes, 1)?;
    let y = ctx.builder.reshape(x, &dims);
    ctx.bind_output(node, 0, y)
}

fn identity(node: &Node, ctx: &mut LoweringContext<'_>) -> Result<()> {
    let x = ctx.input(node, 0)?;
    ctx.bind_output(node, 0, x)
}

/// Inference-mode dropout passes its input through.
fn dropout(node: &Node, ctx: &mut LoweringContext<'_>) -> Result<()> {
    reject_used_output(node, ctx, 1, "mask")?;
    identity(node, ctx)
}

#[cfg(test)]
mod tests {
    use super::super::testing::{assert_close, node, run_graph, run_node};
    use crate::ir::Attribute;
    use crate::CompilerError;
    use onnx_xla_engine::Literal;

    fn iota(dims: Vec<i64>) -> Literal {
        let count: i64 = dims.iter().product();
        Literal::from_vec(dims, (0..count).map(|v| v as f32).collect()).unwrap()
    }

    #[test]
    fn test_concat_negative_axis() {
        let a = iota(vec![2, 1]);
        let b = Literal::from_vec(vec![2, 2], vec![10.0f32, 11.0, 12.0, 13.0]).unwrap();
        let y = run_node(
            node("Concat", &["a", "b"], &["y"], vec![("axis", Attribute::Int(-1))]),
            &[("a", a), ("b", b)],
            &[],
        )
        .unwrap();
        assert_close(&y, &[0.0, 10.0, 11.0, 1.0, 12.0, 13.0], &[2, 3]);
    }

    #[test]
    fn test_concat_requires_axis() {
        let a = iota(vec![2]);
        let err = run_node(node("Concat", &["a", "a"], &["y"], vec![]), &[("a", a)], &[]).unwrap_err();
        assert!(matches!(err, CompilerError::MissingAttribute(_)));
    }

    #[test]
    fn test_reshape_with_constant_shape() {
        let x = iota(vec![2, 3, 4]);
        let shape = Literal::vec1(&[0i64, -1]);
        let y = run_node(node("Reshape", &["x", "s"], &["y"], vec![]), &[("x", x)], &[("s", shape)]).unwrap();
        let expected: Vec<f32> = (0..24).map(|v| v as f32).collect();
        assert_close(&y, &expected, &[2, 12]);
    }

    #[test]
    fn test_reshape_with_runtime_shape_is_unsupported() {
        let x = iota(vec![2, 3]);
        let shape = Literal::vec1(&[6i64]);
        let err = run_node(
            node("Reshape", &["x", "s"], &["y"], vec![]),
            &[("x", x), ("s", shape)],
            &[],
        )
        .unwrap_err();
        assert!(matches!(err, CompilerError::UnsupportedVersion(_)));
    }

    #[test]
    fn test_transpose_defaults_to_reversed_axes() {
        let x = iota(vec![2, 3]);
        let y = run_node(node("Transpose", &["x"], &["y"], vec![]), &[("x", x)], &[]).unwrap();
        assert_close(&y, &[0.0, 3.0, 1.0, 4.0, 2.0, 5.0], &[3, 2]);
    }

    #[test]
    fn test_transpose_with_perm() {
        let x = iota(vec![1, 2, 3]);
        let y = run_node(
            node("Transpose", &["x"], &["y"], vec![("perm", Attribute::Ints(vec![0, 2, 1]))]),
            &[("x", x)],
            &[],
        )
        .unwrap();
        assert_close(&y, &[0.0, 3.0, 1.0, 4.0, 2.0, 5.0], &[1, 3, 2]);
    }

    #[test]
    fn test_unsqueeze_inserts_unit_axes() {
        let x = iota(vec![3]);
        let y = run_node(
            node("Unsqueeze", &["x"], &["y"], vec![("axes", Attribute::Ints(vec![0, 2]))]),
            &[("x", x)],
            &[],
        )
        .unwrap();
        assert_close(&y, &[0.0, 1.0, 2.0], &[1, 3, 1]);
    }

    #[test]
    fn test_identity_and_dropout_pass_through() {
        let x = iota(vec![2, 2]);
        let outputs = run_graph(
            vec![
                node("Identity", &["x"], &["i"], vec![]),
                node("Dropout", &["i"], &["y", "mask"], vec![]),
            ],
            &[("x", x)],
            &[],
            &["y"],
        )
        .unwrap();
        assert_close(&outputs[0], &[0.0, 1.0, 2.0, 3.0], &[2, 2]);
    }

    #[test]
    fn test_dropout_mask_output_is_unsupported() {
        let x = iota(vec![2]);
        let err = run_graph(
            vec![node("Dropout", &["x"], &["y", "mask"], vec![])],
            &[("x", x)],
            &[],
            &["y", "mask"],
        )
        .unwrap_err();
        assert!(matches!(err, CompilerError::UnsupportedAttribute(_)));
    }
}
