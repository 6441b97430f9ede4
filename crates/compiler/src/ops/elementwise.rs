//! Elementwise arithmetic: Add, Sub, Mul, Div, Sum, Relu

use super::scalar;
use crate::ir::Node;
use crate::registry::{LoweringContext, OperatorRegistry};
use crate::utils::multidirectional_broadcast_dims;
use crate::{CompilerError, Result};
use onnx_xla_engine::BinaryOp;

pub(super) fn register(registry: &mut OperatorRegistry) {
    registry.register("Add", add);
    registry.register("Sub", sub);
    registry.register("Mul", mul);
    registry.register("Div", div);
    registry.register("Sum", sum);
    registry.register("Relu", relu);
}

fn binary(node: &Node, ctx: &mut LoweringContext<'_>, op: BinaryOp) -> Result<()> {
    let lhs = ctx.input(node, 0)?;
    let rhs = ctx.input(node, 1)?;
    let lhs_rank = ctx.static_input_shape(node, 0)?.len();
    let rhs_rank = ctx.static_input_shape(node, 1)?.len();
    let broadcast_dims = multidirectional_broadcast_dims(lhs_rank, rhs_rank);
    let y = ctx.builder.binary(op, lhs, rhs, &broadcast_dims);
    ctx.bind_output(node, 0, y)
}

fn add(node: &Node, ctx: &mut LoweringContext<'_>) -> Result<()> {
    binary(node, ctx, BinaryOp::Add)
}

fn sub(node: &Node, ctx: &mut LoweringContext<'_>) -> Result<()> {
    binary(node, ctx, BinaryOp::Sub)
}

fn mul(node: &Node, ctx: &mut LoweringContext<'_>) -> Result<()> {
    binary(node, ctx, BinaryOp::Mul)
}

fn div(node: &Node, ctx: &mut LoweringContext<'_>) -> Result<()> {
    binary(node, ctx, BinaryOp::Div)
}

/// n-ary sum as a chain of broadcasting adds
fn sum(node: &Node, ctx: &mut LoweringContext<'_>) -> Result<()> {
    let count = node.inputs.len();
    if node.present_inputs().count() != count || count == 0 {
        return Err(CompilerError::InvalidModel(format!(
            "Sum node '{}' needs at least one input and no omitted ones",
            node.name
        )));
    }
    let mut acc = ctx.input(node, 0)?;
    let mut acc_rank = ctx.static_input_shape(node, 0)?.len();
    for i in 1..count {
        let next = ctx.input(node, i)?;
        let rank = ctx.static_input_shape(node, i)?.len();
        let broadcast_dims = multidirectional_broadcast_dims(acc_rank, rank);
        acc = ctx.builder.add(acc, next, &broadcast_dims);
        acc_rank = acc_rank.max(rank);
    }
    ctx.bind_output(node, 0, acc)
}

/// `max(x, 0)`
fn relu(node: &Node, ctx: &mut LoweringContext<'_>) -> Result<()> {
    let x = ctx.input(node, 0)?;
    let ty = ctx.input_type(node, 0)?;
    let zero = scalar(ctx, ty, 0.0);
    let y = ctx.builder.max(x, zero, &[]);
    ctx.bind_output(node, 0, y)
}

#[cfg(test)]
mod tests {
    use super::super::testing::{assert_close, node, run_node};
    use crate::CompilerError;
    use onnx_xla_engine::Literal;

    #[test]
    fn test_add_broadcasts_trailing_axes() {
        let a = Literal::from_vec(vec![2, 3], vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let b = Literal::vec1(&[10.0f32, 20.0, 30.0]);
        let y = run_node(node("Add", &["a", "b"], &["y"], vec![]), &[("a", a), ("b", b)], &[]).unwrap();
        assert_close(&y, &[11.0, 22.0, 33.0, 14.0, 25.0, 36.0], &[2, 3]);
    }

    #[test]
    fn test_sub_and_div_with_size_one_axes() {
        let a = Literal::from_vec(vec![2, 1], vec![4.0f32, 8.0]).unwrap();
        let b = Literal::from_vec(vec![1, 2], vec![1.0f32, 2.0]).unwrap();
        let y = run_node(node("Div", &["a", "b"], &["y"], vec![]), &[("a", a.clone()), ("b", b.clone())], &[]).unwrap();
        assert_close(&y, &[4.0, 2.0, 8.0, 4.0], &[2, 2]);
        let y = run_node(node("Sub", &["a", "b"], &["y"], vec![]), &[("a", a), ("b", b)], &[]).unwrap();
        assert_close(&y, &[3.0, 2.0, 7.0, 6.0], &[2, 2]);
    }

    #[test]
    fn test_mul_with_scalar_constant() {
        let a = Literal::vec1(&[1i64, -2, 3]);
        let k = Literal::scalar(3i64);
        let y = run_node(node("Mul", &["a", "k"], &["y"], vec![]), &[("a", a)], &[("k", k)]).unwrap();
        assert_eq!(y.to_vec::<i64>().unwrap(), vec![3, -6, 9]);
    }

    #[test]
    fn test_sum_chains_three_inputs() {
        let a = Literal::vec1(&[1.0f32, 2.0]);
        let b = Literal::vec1(&[10.0f32, 20.0]);
        let c = Literal::scalar(100.0f32);
        let y = run_node(
            node("Sum", &["a", "b", "c"], &["y"], vec![]),
            &[("a", a), ("b", b), ("c", c)],
            &[],
        )
        .unwrap();
        assert_close(&y, &[111.0, 122.0], &[2]);
    }

    #[test]
    fn test_sum_rejects_omitted_input() {
        let a = Literal::vec1(&[1.0f32]);
        let err = run_node(node("Sum", &["a", ""], &["y"], vec![]), &[("a", a)], &[]).unwrap_err();
        assert!(matches!(err, CompilerError::InvalidModel(_)));
    }

    #[test]
    fn test_relu_clamps_negatives() {
        let x = Literal::from_vec(vec![2, 2], vec![-1.5f32, 0.0, 2.5, -0.1]).unwrap();
        let y = run_node(node("Relu", &["x"], &["y"], vec![]), &[("x", x)], &[]).unwrap();
        assert_close(&y, &[0.0, 0.0, 2.5, 0.0], &[2, 2]);
    }
}
