use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone)]
pub struct TensorView<'a, T: Clone = f32> {
    pub data: Cow<'a, [T]>,
    pub shape: Cow<'a, [usize]>,
}
impl<'a, T: Clone> TensorView<'a, T> {
    pub fn new(data: &'a [T], shape: &'a [usize]) -> Self {
        let len: usize = shape.iter().product();
        assert_eq!(data.len(), len, "Data length mismatch");
        Self {
            data: Cow::Borrowed(data),
            shape: Cow::Borrowed(shape),
        }
    }
    pub fn from_owned(data: Vec<T>, shape: Vec<usize>) -> Self {
        let len: usize = shape.iter().product();
        assert_eq!(data.len(), len, "Data length mismatch");
        Self {
            data: Cow::Owned(data),
            shape: Cow::Owned(shape),
        }
    }
    pub fn from_slice(data: &'a [T], shape: Vec<usize>) -> Self {
        let len: usize = shape.iter().product();
        assert_eq!(data.len(), len, "Data length mismatch");
        Self {
            data: Cow::Borrowed(data),
            shape: Cow::Owned(shape),
        }
    }
    pub fn to_owned(&self) -> TensorView<'static, T> {
        TensorView::from_owned(self.data.to_vec(), self.shape.to_vec())
    }
    pub fn empty() -> Self {
        Self {
            data: Cow::Borrowed(&[]),
            shape: Cow::Borrowed(&[]),
        }
    }
    pub fn dim(&self) -> usize {
        self.shape.len()
    }
    pub fn size(&self, dim: usize) -> usize {
        self.shape[dim]
    }
    /// The view's extents as `[N, H, W, C]`. Panics unless the view is rank 4.
    pub fn dims4(&self) -> [usize; 4] {
        assert_eq!(self.dim(), 4, "expected a rank-4 view, got rank {}", self.dim());
        [self.shape[0], self.shape[1], self.shape[2], self.shape[3]]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DType {
    Float32,
    UInt8,
    Int32,
    Int64,
}

impl DType {
    pub fn size_in_bytes(self) -> usize {
        match self {
            DType::Float32 | DType::Int32 => 4,
            DType::UInt8 => 1,
            DType::Int64 => 8,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DType::Float32 => "float32",
            DType::UInt8 => "uint8",
            DType::Int32 => "int32",
            DType::Int64 => "int64",
        };
        f.write_str(name)
    }
}

/// Affine quantization of a uint8 buffer: `real = scale * (code - zero_point)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuantParams {
    pub scale: f32,
    pub zero_point: i32,
}

impl QuantParams {
    pub fn new(scale: f32, zero_point: i32) -> Self {
        Self { scale, zero_point }
    }
    pub fn dequantize(&self, code: u8) -> f32 {
        self.scale * (code as i32 - self.zero_point) as f32
    }
    pub fn quantize(&self, value: f32) -> u8 {
        let code = (value / self.scale).round() as i64 + self.zero_point as i64;
        code.clamp(u8::MIN as i64, u8::MAX as i64) as u8
    }
}

/// Dynamically-typed element storage of a host buffer.
#[derive(Debug, Clone)]
pub enum TensorData<'a> {
    Float32(Cow<'a, [f32]>),
    UInt8(Cow<'a, [u8]>),
    Int32(Cow<'a, [i32]>),
    Int64(Cow<'a, [i64]>),
}

impl TensorData<'_> {
    pub fn dtype(&self) -> DType {
        match self {
            TensorData::Float32(_) => DType::Float32,
            TensorData::UInt8(_) => DType::UInt8,
            TensorData::Int32(_) => DType::Int32,
            TensorData::Int64(_) => DType::Int64,
        }
    }
    pub fn len(&self) -> usize {
        match self {
            TensorData::Float32(d) => d.len(),
            TensorData::UInt8(d) => d.len(),
            TensorData::Int32(d) => d.len(),
            TensorData::Int64(d) => d.len(),
        }
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug)]
pub enum TensorDataMut<'a> {
    Float32(&'a mut [f32]),
    UInt8(&'a mut [u8]),
    Int32(&'a mut [i32]),
    Int64(&'a mut [i64]),
}

impl TensorDataMut<'_> {
    pub fn dtype(&self) -> DType {
        match self {
            TensorDataMut::Float32(_) => DType::Float32,
            TensorDataMut::UInt8(_) => DType::UInt8,
            TensorDataMut::Int32(_) => DType::Int32,
            TensorDataMut::Int64(_) => DType::Int64,
        }
    }
    pub fn len(&self) -> usize {
        match self {
            TensorDataMut::Float32(d) => d.len(),
            TensorDataMut::UInt8(d) => d.len(),
            TensorDataMut::Int32(d) => d.len(),
            TensorDataMut::Int64(d) => d.len(),
        }
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Element types a buffer may hold at the host boundary.
pub trait Element: Copy + Clone + Default + PartialEq + fmt::Debug + Send + Sync + 'static {
    const DTYPE: DType;
    fn wrap(data: Cow<'_, [Self]>) -> TensorData<'_>;
    fn wrap_mut(data: &mut [Self]) -> TensorDataMut<'_>;
    fn unwrap<'b>(data: &'b TensorData<'_>) -> Option<&'b [Self]>;
    fn unwrap_mut<'b>(data: &'b mut TensorDataMut<'_>) -> Option<&'b mut [Self]>;
}

macro_rules! impl_element {
    ($ty:ty, $variant:ident) => {
        impl Element for $ty {
            const DTYPE: DType = DType::$variant;
            fn wrap(data: Cow<'_, [Self]>) -> TensorData<'_> {
                TensorData::$variant(data)
            }
            fn wrap_mut(data: &mut [Self]) -> TensorDataMut<'_> {
                TensorDataMut::$variant(data)
            }
            fn unwrap<'b>(data: &'b TensorData<'_>) -> Option<&'b [Self]> {
                match data {
                    TensorData::$variant(d) => Some(d.as_ref()),
                    _ => None,
                }
            }
            fn unwrap_mut<'b>(data: &'b mut TensorDataMut<'_>) -> Option<&'b mut [Self]> {
                match data {
                    TensorDataMut::$variant(d) => Some(&mut **d),
                    _ => None,
                }
            }
        }
    };
}

impl_element!(f32, Float32);
impl_element!(u8, UInt8);
impl_element!(i32, Int32);
impl_element!(i64, Int64);

/// A borrowed, dynamically-typed input buffer as bound by the host.
#[derive(Debug, Clone)]
pub struct Operand<'a> {
    pub data: TensorData<'a>,
    pub shape: Cow<'a, [usize]>,
    pub quant: Option<QuantParams>,
    /// Contents are fixed for the lifetime of the operator instance.
    pub constant: bool,
}

impl<'a> Operand<'a> {
    pub fn new<T: Element>(view: TensorView<'a, T>) -> Self {
        Self {
            data: T::wrap(view.data),
            shape: view.shape,
            quant: None,
            constant: false,
        }
    }
    pub fn quantized(view: TensorView<'a, u8>, quant: QuantParams) -> Self {
        Self::new(view).with_quant(quant)
    }
    /// A rank-1 int32 output-shape descriptor.
    pub fn shape_descriptor(dims: &[i32]) -> Operand<'static> {
        Operand::new(TensorView::from_owned(dims.to_vec(), vec![dims.len()]))
    }
    pub fn with_quant(mut self, quant: QuantParams) -> Self {
        self.quant = Some(quant);
        self
    }
    pub fn with_constant(mut self, constant: bool) -> Self {
        self.constant = constant;
        self
    }
    pub fn dtype(&self) -> DType {
        self.data.dtype()
    }
    pub fn rank(&self) -> usize {
        self.shape.len()
    }
    /// Borrow as a typed view if the element type is `T`.
    pub fn view<T: Element>(&self) -> Option<TensorView<'_, T>> {
        T::unwrap(&self.data).map(|data| TensorView {
            data: Cow::Borrowed(data),
            shape: Cow::Borrowed(self.shape.as_ref()),
        })
    }
}

/// A host-owned output buffer the operator overwrites in full.
#[derive(Debug)]
pub struct OperandMut<'a> {
    pub data: TensorDataMut<'a>,
    pub shape: Cow<'a, [usize]>,
    pub quant: Option<QuantParams>,
}

impl<'a> OperandMut<'a> {
    pub fn new<T: Element>(data: &'a mut [T], shape: &'a [usize]) -> Self {
        Self {
            data: T::wrap_mut(data),
            shape: Cow::Borrowed(shape),
            quant: None,
        }
    }
    pub fn quantized(data: &'a mut [u8], shape: &'a [usize], quant: QuantParams) -> Self {
        Self {
            quant: Some(quant),
            ..Self::new(data, shape)
        }
    }
    pub fn dtype(&self) -> DType {
        self.data.dtype()
    }
    pub fn slice_mut<T: Element>(&mut self) -> Option<&mut [T]> {
        T::unwrap_mut(&mut self.data)
    }
}
