//! Host-resident literal values
//!
//! A [`Literal`] is either a dense row-major array of one of the thirteen
//! primitive element types or a tuple of literals. Storage is a closed
//! enum ([`LiteralData`]) with one variant per element type, and generic
//! element code is written against [`NativeType`].

use crate::error::{EngineError, Result};
use crate::shape::{element_count, ArrayShape, PrimitiveType, Shape};
use half::f16;
use num_complex::Complex32;
use std::fmt;

/// Rust element types that back a [`PrimitiveType`].
pub trait NativeType: Copy + Default + Send + Sync + PartialEq + fmt::Debug + 'static {
    const TYPE: PrimitiveType;

    fn one() -> Self;

    /// Lowest representable value (negative infinity for floats)
    fn lowest() -> Self;

    fn from_f64(value: f64) -> Self;
    fn to_f64(self) -> f64;
    fn from_i128(value: i128) -> Self;
    fn to_i128(self) -> i128;

    fn from_complex(value: Complex32) -> Self {
        Self::from_f64(value.re as f64)
    }

    fn to_complex(self) -> Complex32 {
        Complex32::new(self.to_f64() as f32, 0.0)
    }

    fn elem_add(self, rhs: Self) -> Self;
    fn elem_sub(self, rhs: Self) -> Self;
    fn elem_mul(self, rhs: Self) -> Self;
    fn elem_div(self, rhs: Self) -> Self;
    fn elem_max(self, rhs: Self) -> Self;
    fn elem_pow(self, rhs: Self) -> Self;
    fn elem_exp(self) -> Self;
    fn elem_sqrt(self) -> Self;

    fn into_data(values: Vec<Self>) -> LiteralData;
    fn slice(data: &LiteralData) -> Option<&[Self]>;
}

/// Convert a single element between native types.
///
/// Integer to integer conversion goes through `i128` and wraps; anything
/// touching a floating type goes through `f64`.
pub fn convert_element<S: NativeType, D: NativeType>(value: S) -> D {
    if D::TYPE.is_complex() {
        D::from_complex(value.to_complex())
    } else if S::TYPE.is_floating() || S::TYPE.is_complex() || D::TYPE.is_floating() {
        D::from_f64(value.to_f64())
    } else {
        D::from_i128(value.to_i128())
    }
}

macro_rules! impl_native_int {
    ($($t:ty => $variant:ident),* $(,)?) => {$(
        impl NativeType for $t {
            const TYPE: PrimitiveType = PrimitiveType::$variant;

            fn one() -> Self { 1 }
            fn lowest() -> Self { <$t>::MIN }
            fn from_f64(value: f64) -> Self { value as $t }
            fn to_f64(self) -> f64 { self as f64 }
            fn from_i128(value: i128) -> Self { value as $t }
            fn to_i128(self) -> i128 { self as i128 }

            fn elem_add(self, rhs: Self) -> Self { self.wrapping_add(rhs) }
            fn elem_sub(self, rhs: Self) -> Self { self.wrapping_sub(rhs) }
            fn elem_mul(self, rhs: Self) -> Self { self.wrapping_mul(rhs) }
            fn elem_div(self, rhs: Self) -> Self {
                if rhs == 0 { 0 } else { self.wrapping_div(rhs) }
            }
            fn elem_max(self, rhs: Self) -> Self { Ord::max(self, rhs) }
            fn elem_pow(self, rhs: Self) -> Self {
                let exponent = rhs.to_i128();
                if exponent < 0 {
                    0
                } else {
                    self.wrapping_pow(exponent.min(u32::MAX as i128) as u32)
                }
            }
            fn elem_exp(self) -> Self { Self::from_f64(self.to_f64().exp()) }
            fn elem_sqrt(self) -> Self { Self::from_f64(self.to_f64().sqrt()) }

            fn into_data(values: Vec<Self>) -> LiteralData { LiteralData::$variant(values) }
            fn slice(data: &LiteralData) -> Option<&[Self]> {
                match data {
                    LiteralData::$variant(values) => Some(values),
                    _ => None,
                }
            }
        }
    )*};
}

macro_rules! impl_native_float {
    ($($t:ty => $variant:ident),* $(,)?) => {$(
        impl NativeType for $t {
            const TYPE: PrimitiveType = PrimitiveType::$variant;

            fn one() -> Self { 1.0 }
            fn lowest() -> Self { <$t>::NEG_INFINITY }
            fn from_f64(value: f64) -> Self { value as $t }
            fn to_f64(self) -> f64 { self as f64 }
            fn from_i128(value: i128) -> Self { value as $t }
            fn to_i128(self) -> i128 { self as i128 }

            fn elem_add(self, rhs: Self) -> Self { self + rhs }
            fn elem_sub(self, rhs: Self) -> Self { self - rhs }
            fn elem_mul(self, rhs: Self) -> Self { self * rhs }
            fn elem_div(self, rhs: Self) -> Self { self / rhs }
            fn elem_max(self, rhs: Self) -> Self {
                if self.is_nan() || self >= rhs { self } else { rhs }
            }
            fn elem_pow(self, rhs: Self) -> Self { self.powf(rhs) }
            fn elem_exp(self) -> Self { self.exp() }
            fn elem_sqrt(self) -> Self { self.sqrt() }

            fn into_data(values: Vec<Self>) -> LiteralData { LiteralData::$variant(values) }
            fn slice(data: &LiteralData) -> Option<&[Self]> {
                match data {
                    LiteralData::$variant(values) => Some(values),
                    _ => None,
                }
            }
        }
    )*};
}

impl_native_int!(
    i8 => S8,
    i16 => S16,
    i32 => S32,
    i64 => S64,
    u8 => U8,
    u16 => U16,
    u32 => U32,
    u64 => U64,
);

impl_native_float!(f32 => F32, f64 => F64);

impl NativeType for bool {
    const TYPE: PrimitiveType = PrimitiveType::Pred;

    fn one() -> Self {
        true
    }
    fn lowest() -> Self {
        false
    }
    fn from_f64(value: f64) -> Self {
        value != 0.0
    }
    fn to_f64(self) -> f64 {
        if self {
            1.0
        } else {
            0.0
        }
    }
    fn from_i128(value: i128) -> Self {
        value != 0
    }
    fn to_i128(self) -> i128 {
        self as i128
    }

    fn elem_add(self, rhs: Self) -> Self {
        self | rhs
    }
    fn elem_sub(self, rhs: Self) -> Self {
        self ^ rhs
    }
    fn elem_mul(self, rhs: Self) -> Self {
        self & rhs
    }
    fn elem_div(self, rhs: Self) -> Self {
        self & rhs
    }
    fn elem_max(self, rhs: Self) -> Self {
        self | rhs
    }
    fn elem_pow(self, rhs: Self) -> Self {
        self | !rhs
    }
    fn elem_exp(self) -> Self {
        true
    }
    fn elem_sqrt(self) -> Self {
        self
    }

    fn into_data(values: Vec<Self>) -> LiteralData {
        LiteralData::Pred(values)
    }
    fn slice(data: &LiteralData) -> Option<&[Self]> {
        match data {
            LiteralData::Pred(values) => Some(values),
            _ => None,
        }
    }
}

impl NativeType for f16 {
    const TYPE: PrimitiveType = PrimitiveType::F16;

    fn one() -> Self {
        f16::ONE
    }
    fn lowest() -> Self {
        f16::NEG_INFINITY
    }
    fn from_f64(value: f64) -> Self {
        f16::from_f64(value)
    }
    fn to_f64(self) -> f64 {
        f16::to_f64(self)
    }
    fn from_i128(value: i128) -> Self {
        f16::from_f64(value as f64)
    }
    fn to_i128(self) -> i128 {
        f16::to_f64(self) as i128
    }

    fn elem_add(self, rhs: Self) -> Self {
        f16::from_f32(self.to_f32() + rhs.to_f32())
    }
    fn elem_sub(self, rhs: Self) -> Self {
        f16::from_f32(self.to_f32() - rhs.to_f32())
    }
    fn elem_mul(self, rhs: Self) -> Self {
        f16::from_f32(self.to_f32() * rhs.to_f32())
    }
    fn elem_div(self, rhs: Self) -> Self {
        f16::from_f32(self.to_f32() / rhs.to_f32())
    }
    fn elem_max(self, rhs: Self) -> Self {
        f16::from_f32(self.to_f32().elem_max(rhs.to_f32()))
    }
    fn elem_pow(self, rhs: Self) -> Self {
        f16::from_f32(self.to_f32().powf(rhs.to_f32()))
    }
    fn elem_exp(self) -> Self {
        f16::from_f32(self.to_f32().exp())
    }
    fn elem_sqrt(self) -> Self {
        f16::from_f32(self.to_f32().sqrt())
    }

    fn into_data(values: Vec<Self>) -> LiteralData {
        LiteralData::F16(values)
    }
    fn slice(data: &LiteralData) -> Option<&[Self]> {
        match data {
            LiteralData::F16(values) => Some(values),
            _ => None,
        }
    }
}

impl NativeType for Complex32 {
    const TYPE: PrimitiveType = PrimitiveType::C64;

    fn one() -> Self {
        Complex32::new(1.0, 0.0)
    }
    fn lowest() -> Self {
        Complex32::new(f32::NEG_INFINITY, 0.0)
    }
    fn from_f64(value: f64) -> Self {
        Complex32::new(value as f32, 0.0)
    }
    fn to_f64(self) -> f64 {
        self.re as f64
    }
    fn from_i128(value: i128) -> Self {
        Complex32::new(value as f32, 0.0)
    }
    fn to_i128(self) -> i128 {
        self.re as i128
    }
    fn from_complex(value: Complex32) -> Self {
        value
    }
    fn to_complex(self) -> Complex32 {
        self
    }

    fn elem_add(self, rhs: Self) -> Self {
        self + rhs
    }
    fn elem_sub(self, rhs: Self) -> Self {
        self - rhs
    }
    fn elem_mul(self, rhs: Self) -> Self {
        self * rhs
    }
    fn elem_div(self, rhs: Self) -> Self {
        self / rhs
    }
    // Ordering on the real part; the builder rejects Max for complex operands.
    fn elem_max(self, rhs: Self) -> Self {
        if self.re >= rhs.re {
            self
        } else {
            rhs
        }
    }
    fn elem_pow(self, rhs: Self) -> Self {
        self.powc(rhs)
    }
    fn elem_exp(self) -> Self {
        self.exp()
    }
    fn elem_sqrt(self) -> Self {
        self.sqrt()
    }

    fn into_data(values: Vec<Self>) -> LiteralData {
        LiteralData::C64(values)
    }
    fn slice(data: &LiteralData) -> Option<&[Self]> {
        match data {
            LiteralData::C64(values) => Some(values),
            _ => None,
        }
    }
}

/// Typed element storage, one variant per [`PrimitiveType`].
#[derive(Debug, Clone, PartialEq)]
pub enum LiteralData {
    Pred(Vec<bool>),
    S8(Vec<i8>),
    S16(Vec<i16>),
    S32(Vec<i32>),
    S64(Vec<i64>),
    U8(Vec<u8>),
    U16(Vec<u16>),
    U32(Vec<u32>),
    U64(Vec<u64>),
    F16(Vec<f16>),
    F32(Vec<f32>),
    F64(Vec<f64>),
    C64(Vec<Complex32>),
}

/// Evaluate `$body` with `$v` bound to the typed vector inside a [`LiteralData`].
#[macro_export]
macro_rules! map_literal_data {
    ($data:expr, $v:ident => $body:expr) => {
        match $data {
            $crate::LiteralData::Pred($v) => $body,
            $crate::LiteralData::S8($v) => $body,
            $crate::LiteralData::S16($v) => $body,
            $crate::LiteralData::S32($v) => $body,
            $crate::LiteralData::S64($v) => $body,
            $crate::LiteralData::U8($v) => $body,
            $crate::LiteralData::U16($v) => $body,
            $crate::LiteralData::U32($v) => $body,
            $crate::LiteralData::U64($v) => $body,
            $crate::LiteralData::F16($v) => $body,
            $crate::LiteralData::F32($v) => $body,
            $crate::LiteralData::F64($v) => $body,
            $crate::LiteralData::C64($v) => $body,
        }
    };
}

/// Evaluate `$body` with the type alias `$t` bound to the native type of a
/// [`PrimitiveType`].
#[macro_export]
macro_rules! with_native_type {
    ($ty:expr, $t:ident => $body:expr) => {
        match $ty {
            $crate::PrimitiveType::Pred => {
                type $t = bool;
                $body
            }
            $crate::PrimitiveType::S8 => {
                type $t = i8;
                $body
            }
            $crate::PrimitiveType::S16 => {
                type $t = i16;
                $body
            }
            $crate::PrimitiveType::S32 => {
                type $t = i32;
                $body
            }
            $crate::PrimitiveType::S64 => {
                type $t = i64;
                $body
            }
            $crate::PrimitiveType::U8 => {
                type $t = u8;
                $body
            }
            $crate::PrimitiveType::U16 => {
                type $t = u16;
                $body
            }
            $crate::PrimitiveType::U32 => {
                type $t = u32;
                $body
            }
            $crate::PrimitiveType::U64 => {
                type $t = u64;
                $body
            }
            $crate::PrimitiveType::F16 => {
                type $t = $crate::half::f16;
                $body
            }
            $crate::PrimitiveType::F32 => {
                type $t = f32;
                $body
            }
            $crate::PrimitiveType::F64 => {
                type $t = f64;
                $body
            }
            $crate::PrimitiveType::C64 => {
                type $t = $crate::num_complex::Complex32;
                $body
            }
        }
    };
}

impl LiteralData {
    pub fn element_type(&self) -> PrimitiveType {
        match self {
            LiteralData::Pred(_) => PrimitiveType::Pred,
            LiteralData::S8(_) => PrimitiveType::S8,
            LiteralData::S16(_) => PrimitiveType::S16,
            LiteralData::S32(_) => PrimitiveType::S32,
            LiteralData::S64(_) => PrimitiveType::S64,
            LiteralData::U8(_) => PrimitiveType::U8,
            LiteralData::U16(_) => PrimitiveType::U16,
            LiteralData::U32(_) => PrimitiveType::U32,
            LiteralData::U64(_) => PrimitiveType::U64,
            LiteralData::F16(_) => PrimitiveType::F16,
            LiteralData::F32(_) => PrimitiveType::F32,
            LiteralData::F64(_) => PrimitiveType::F64,
            LiteralData::C64(_) => PrimitiveType::C64,
        }
    }

    pub fn len(&self) -> usize {
        map_literal_data!(self, v => v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Numerically convert every element to `ty`
    pub fn convert(&self, ty: PrimitiveType) -> LiteralData {
        if self.element_type() == ty {
            return self.clone();
        }
        map_literal_data!(self, v => convert_values(v, ty))
    }

    /// `count` copies of `value`
    pub fn splat<T: NativeType>(value: T, count: usize) -> LiteralData {
        T::into_data(vec![value; count])
    }
}

fn convert_values<S: NativeType>(values: &[S], ty: PrimitiveType) -> LiteralData {
    with_native_type!(ty, D => {
        let converted: Vec<D> = values.iter().map(|&v| convert_element::<S, D>(v)).collect();
        D::into_data(converted)
    })
}

/// Dense array literal: dimensions plus typed storage.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayLiteral {
    dims: Vec<i64>,
    data: LiteralData,
}

impl ArrayLiteral {
    pub fn dims(&self) -> &[i64] {
        &self.dims
    }

    pub fn data(&self) -> &LiteralData {
        &self.data
    }

    pub fn into_data(self) -> LiteralData {
        self.data
    }

    pub fn element_type(&self) -> PrimitiveType {
        self.data.element_type()
    }

    pub fn shape(&self) -> ArrayShape {
        ArrayShape::new(self.element_type(), self.dims.clone())
    }
}

/// A host value: dense array or tuple.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Array(ArrayLiteral),
    Tuple(Vec<Literal>),
}

impl Literal {
    /// Array literal from typed storage; the element count must match `dims`
    pub fn from_data(dims: impl Into<Vec<i64>>, data: LiteralData) -> Result<Self> {
        let dims = dims.into();
        if dims.iter().any(|&d| d < 0) {
            return Err(EngineError::literal(format!("negative dimension in {:?}", dims)));
        }
        let expected = element_count(&dims);
        if data.len() != expected {
            return Err(EngineError::literal(format!(
                "dimensions {:?} need {} elements, got {}",
                dims,
                expected,
                data.len()
            )));
        }
        Ok(Literal::Array(ArrayLiteral { dims, data }))
    }

    pub fn from_vec<T: NativeType>(dims: impl Into<Vec<i64>>, values: Vec<T>) -> Result<Self> {
        Self::from_data(dims, T::into_data(values))
    }

    /// Rank-1 literal
    pub fn vec1<T: NativeType>(values: &[T]) -> Self {
        Literal::Array(ArrayLiteral {
            dims: vec![values.len() as i64],
            data: T::into_data(values.to_vec()),
        })
    }

    pub fn scalar<T: NativeType>(value: T) -> Self {
        Literal::Array(ArrayLiteral {
            dims: Vec::new(),
            data: T::into_data(vec![value]),
        })
    }

    pub fn zero(ty: PrimitiveType) -> Self {
        with_native_type!(ty, T => Self::scalar(T::default()))
    }

    pub fn one(ty: PrimitiveType) -> Self {
        with_native_type!(ty, T => Self::scalar(T::one()))
    }

    /// Lowest value of `ty`; the identity of a max reduction
    pub fn min_value(ty: PrimitiveType) -> Self {
        with_native_type!(ty, T => Self::scalar(T::lowest()))
    }

    /// Scalar of type `ty` holding `value` converted numerically
    pub fn from_f64(ty: PrimitiveType, value: f64) -> Self {
        with_native_type!(ty, T => Self::scalar(T::from_f64(value)))
    }

    pub fn tuple(elements: Vec<Literal>) -> Self {
        Literal::Tuple(elements)
    }

    pub fn shape(&self) -> Shape {
        match self {
            Literal::Array(array) => Shape::Array(array.shape()),
            Literal::Tuple(elements) => Shape::Tuple(elements.iter().map(Literal::shape).collect()),
        }
    }

    pub fn as_array(&self) -> Result<&ArrayLiteral> {
        match self {
            Literal::Array(array) => Ok(array),
            Literal::Tuple(_) => Err(EngineError::literal("expected an array literal, found a tuple")),
        }
    }

    pub fn into_array(self) -> Result<ArrayLiteral> {
        match self {
            Literal::Array(array) => Ok(array),
            Literal::Tuple(_) => Err(EngineError::literal("expected an array literal, found a tuple")),
        }
    }

    pub fn element_type(&self) -> Result<PrimitiveType> {
        Ok(self.as_array()?.element_type())
    }

    /// Dimensions of an array literal; empty for tuples
    pub fn dims(&self) -> &[i64] {
        match self {
            Literal::Array(array) => &array.dims,
            Literal::Tuple(_) => &[],
        }
    }

    pub fn element_count(&self) -> usize {
        match self {
            Literal::Array(array) => array.data.len(),
            Literal::Tuple(_) => 0,
        }
    }

    /// Borrow the elements as `T`; the element type must match exactly
    pub fn as_slice<T: NativeType>(&self) -> Result<&[T]> {
        let array = self.as_array()?;
        T::slice(&array.data).ok_or_else(|| {
            EngineError::literal(format!(
                "literal holds {} elements, requested {}",
                array.element_type(),
                T::TYPE
            ))
        })
    }

    pub fn to_vec<T: NativeType>(&self) -> Result<Vec<T>> {
        Ok(self.as_slice::<T>()?.to_vec())
    }

    /// Elements converted to `i64`, for shape-like constants
    pub fn to_i64_vec(&self) -> Result<Vec<i64>> {
        let array = self.as_array()?;
        match array.data.convert(PrimitiveType::S64) {
            LiteralData::S64(values) => Ok(values),
            other => Err(EngineError::literal(format!(
                "conversion to s64 produced {}",
                other.element_type()
            ))),
        }
    }

    /// Numeric conversion of an array literal to `ty`
    pub fn convert(&self, ty: PrimitiveType) -> Result<Literal> {
        let array = self.as_array()?;
        Ok(Literal::Array(ArrayLiteral {
            dims: array.dims.clone(),
            data: array.data.convert(ty),
        }))
    }

    /// Same elements under new dimensions
    pub fn reshape(&self, dims: &[i64]) -> Result<Literal> {
        let array = self.as_array()?;
        Literal::from_data(dims.to_vec(), array.data.clone())
    }

    /// Split a tuple literal into its elements
    pub fn decompose_tuple(self) -> Result<Vec<Literal>> {
        match self {
            Literal::Tuple(elements) => Ok(elements),
            Literal::Array(array) => Err(EngineError::literal(format!(
                "cannot decompose non-tuple literal {}",
                array.shape()
            ))),
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Array(array) => {
                write!(f, "{} ", array.shape())?;
                map_literal_data!(&array.data, v => write!(f, "{:?}", v))
            }
            Literal::Tuple(elements) => {
                write!(f, "(")?;
                for (i, element) in elements.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", element)?;
                }
                write!(f, ")")
            }
        }
    }
}
