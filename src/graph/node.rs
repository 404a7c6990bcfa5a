use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;

use super::{Graph, NodeId};

/// The ONNX operator domain.
pub const ONNX_DOMAIN: &str = "";

/// Alternative spelling of [`ONNX_DOMAIN`] used by some exporters.
pub const ONNX_DOMAIN_ALIAS: &str = "ai.onnx";

#[derive(Clone, Debug)]
pub enum Node {
    Operator(OperatorNode),
    Constant(Constant),
    Value(ValueNode),
}

impl Node {
    /// Return the debug name of this node
    pub fn name(&self) -> Option<&str> {
        match self {
            Node::Operator(node) => node.name(),
            Node::Constant(constant) => constant.name(),
            Node::Value(node) => node.name(),
        }
    }

    /// Return the tensor shape associated with this node.
    ///
    /// For constants this is the shape of the tensor. Operator nodes have no
    /// shape. For values (eg. inputs/outputs) this is the shape determined
    /// by shape inference, if any.
    pub fn shape(&self) -> Option<Cow<'_, [Dimension]>> {
        match self {
            Node::Operator(_) => None,
            Node::Constant(node) => Some(Cow::Owned(
                node.shape().iter().copied().map(Dimension::Fixed).collect(),
            )),
            Node::Value(node) => node.shape(),
        }
    }

    /// Return the data type associated with this node.
    ///
    /// - For constants this returns the element type of the tensor
    /// - For values this returns the expected element type of the tensor at
    ///   runtime, if known
    /// - For operators this always returns `None`.
    pub fn dtype(&self) -> Option<DataType> {
        match self {
            Node::Value(node) => node.dtype,
            Node::Constant(constant) => Some(constant.dtype()),
            Node::Operator(_) => None,
        }
    }

    /// Return the contained operator, if this an operator node.
    pub fn as_operator(&self) -> Option<&OperatorNode> {
        match self {
            Node::Operator(op) => Some(op),
            _ => None,
        }
    }

    /// Return the contained constant, if this a constant node.
    pub fn as_constant(&self) -> Option<&Constant> {
        match self {
            Node::Constant(c) => Some(c),
            _ => None,
        }
    }

    /// Return the contained value, if this is a value node.
    pub fn as_value(&self) -> Option<&ValueNode> {
        match self {
            Node::Value(v) => Some(v),
            _ => None,
        }
    }
}

/// Element type of a tensor.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DataType {
    Int64,
    Int32,
    Float,
}

/// Represents the size of a dimension of a runtime-provided value, such as
/// an operator input, output or intermediate value.
#[derive(Clone, PartialEq)]
pub enum Dimension {
    /// A dimension whose size is statically known.
    Fixed(usize),

    /// A dimension whose size is determined at runtime. The symbol provides
    /// a name to identify when different values share a size. It may be
    /// empty if the size is simply unknown.
    Symbolic(String),
}

impl Dimension {
    /// Return the size of this dimension if it is statically known.
    pub fn fixed(&self) -> Option<usize> {
        match self {
            Dimension::Fixed(size) => Some(*size),
            Dimension::Symbolic(_) => None,
        }
    }
}

impl From<usize> for Dimension {
    fn from(val: usize) -> Dimension {
        Dimension::Fixed(val)
    }
}

impl From<String> for Dimension {
    fn from(name: String) -> Dimension {
        Dimension::Symbolic(name)
    }
}

impl<'a> From<&'a str> for Dimension {
    fn from(name: &'a str) -> Dimension {
        Dimension::Symbolic(name.into())
    }
}

impl fmt::Debug for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(size) => write!(f, "{}", size),
            Self::Symbolic(name) => write!(f, "\"{}\"", name),
        }
    }
}

/// Value of a named operator attribute.
#[derive(Clone, Debug, PartialEq)]
pub enum Attribute {
    Int(i64),
    Ints(Vec<i64>),
    Float(f32),
    String(String),
}

/// Identity and static configuration of an operator.
///
/// This describes the operator independently of the node it is attached to:
/// its type, the domain and schema version it comes from, the execution
/// provider it has been assigned to, its attributes and any subgraphs it
/// owns (eg. the branches of an `If`).
#[derive(Clone, Debug)]
pub struct Operator {
    op_type: String,
    domain: String,
    version: u32,
    provider: String,
    attrs: Vec<(String, Attribute)>,
    subgraphs: Vec<Graph>,
}

impl Operator {
    /// Create an operator from the ONNX domain with a given schema version.
    pub fn new(op_type: &str, version: u32) -> Operator {
        Operator {
            op_type: op_type.to_string(),
            domain: ONNX_DOMAIN.to_string(),
            version,
            provider: String::new(),
            attrs: Vec::new(),
            subgraphs: Vec::new(),
        }
    }

    pub fn with_domain(mut self, domain: &str) -> Self {
        self.domain = domain.to_string();
        self
    }

    /// Assign this operator to an execution provider.
    pub fn with_provider(mut self, provider: &str) -> Self {
        self.provider = provider.to_string();
        self
    }

    /// Set an attribute, replacing any existing value with the same name.
    pub fn with_attr(mut self, name: &str, value: Attribute) -> Self {
        if let Some(entry) = self.attrs.iter_mut().find(|(n, _)| n == name) {
            entry.1 = value;
        } else {
            self.attrs.push((name.to_string(), value));
        }
        self
    }

    pub fn with_subgraph(mut self, graph: Graph) -> Self {
        self.subgraphs.push(graph);
        self
    }

    pub fn op_type(&self) -> &str {
        &self.op_type
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Return the version of the operator schema this node was created from.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Return the execution provider this operator is assigned to. This is
    /// empty if no provider has been assigned.
    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn attr(&self, name: &str) -> Option<&Attribute> {
        self.attrs
            .iter()
            .find_map(|(n, value)| (n == name).then_some(value))
    }

    /// Return the value of an integer-array attribute.
    pub fn get_ints(&self, name: &str) -> Option<&[i64]> {
        match self.attr(name) {
            Some(Attribute::Ints(values)) => Some(values),
            _ => None,
        }
    }

    pub fn subgraphs(&self) -> &[Graph] {
        &self.subgraphs
    }

    pub fn subgraphs_mut(&mut self) -> &mut [Graph] {
        &mut self.subgraphs
    }
}

/// Input or output slots of an operator. Most operators have only a few.
pub type NodeIdList = SmallVec<[Option<NodeId>; 4]>;

#[derive(Clone, Debug)]
pub struct OperatorNode {
    name: Option<String>,
    inputs: NodeIdList,
    outputs: NodeIdList,
    operator: Operator,
}

impl OperatorNode {
    pub fn new(
        name: Option<&str>,
        input_ids: &[Option<NodeId>],
        output_ids: &[Option<NodeId>],
        operator: Operator,
    ) -> Self {
        OperatorNode {
            name: name.map(|s| s.to_owned()),
            inputs: input_ids.into(),
            outputs: output_ids.into(),
            operator,
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn input_ids(&self) -> &[Option<NodeId>] {
        &self.inputs
    }

    pub fn output_ids(&self) -> &[Option<NodeId>] {
        &self.outputs
    }

    pub fn operator(&self) -> &Operator {
        &self.operator
    }

    pub fn operator_mut(&mut self) -> &mut Operator {
        &mut self.operator
    }

    /// Replace an input in the operator's list of inputs.
    ///
    /// Consumers outside the graph module should use graph-level methods instead
    /// which update edge caches.
    pub(super) fn replace_input(&mut self, old_id: NodeId, new_id: NodeId) {
        for input_id in self.inputs.iter_mut() {
            if *input_id == Some(old_id) {
                *input_id = Some(new_id);
            }
        }
    }
}

#[derive(Clone, Debug)]
pub struct ValueNode {
    name: Option<String>,
    shape: Option<Vec<Dimension>>,
    dtype: Option<DataType>,
}

impl ValueNode {
    pub fn new(name: Option<&str>, shape: Option<Vec<Dimension>>, dtype: Option<DataType>) -> Self {
        ValueNode {
            name: name.map(|s| s.to_owned()),
            shape,
            dtype,
        }
    }

    /// Return the number of dimensions in this value, if it has shape information.
    pub fn ndim(&self) -> Option<usize> {
        self.shape.as_ref().map(|s| s.len())
    }

    pub fn shape(&self) -> Option<Cow<'_, [Dimension]>> {
        self.shape.as_deref().map(Cow::Borrowed)
    }

    pub fn update_shape(&mut self, shape: Vec<Dimension>) {
        self.shape = Some(shape);
    }

    pub fn update_type(&mut self, dtype: DataType) {
        self.dtype = Some(dtype);
    }

    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

/// A constant tensor (initializer) stored in the graph.
#[derive(Clone, Debug)]
pub enum Constant {
    Int64(ConstantNode<i64>),
    Int32(ConstantNode<i32>),
    Float(ConstantNode<f32>),
}

impl Constant {
    /// Create a constant with a given name, shape and elements in row-major
    /// order.
    ///
    /// Panics if the number of elements does not match the shape.
    pub fn new<T>(name: Option<&str>, shape: &[usize], data: impl Into<Arc<[T]>>) -> Self
    where
        Self: From<ConstantNode<T>>,
    {
        ConstantNode::new(name, shape, data.into()).into()
    }

    /// Return a copy of this constant with a different name.
    ///
    /// This is cheap as the tensor data is reference-counted.
    pub fn with_name(&self, name: Option<&str>) -> Constant {
        let mut constant = self.clone();
        let name = name.map(|s| s.to_string());
        match &mut constant {
            Constant::Int64(i) => i.name = name,
            Constant::Int32(i) => i.name = name,
            Constant::Float(f) => f.name = name,
        }
        constant
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            Constant::Int64(i) => i.name.as_deref(),
            Constant::Int32(i) => i.name.as_deref(),
            Constant::Float(f) => f.name.as_deref(),
        }
    }

    pub fn shape(&self) -> &[usize] {
        match self {
            Constant::Int64(i) => &i.shape,
            Constant::Int32(i) => &i.shape,
            Constant::Float(f) => &f.shape,
        }
    }

    pub fn ndim(&self) -> usize {
        self.shape().len()
    }

    /// Return the number of elements in the tensor.
    pub fn len(&self) -> usize {
        self.shape().iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dtype(&self) -> DataType {
        match self {
            Constant::Int64(_) => DataType::Int64,
            Constant::Int32(_) => DataType::Int32,
            Constant::Float(_) => DataType::Float,
        }
    }

    /// Return the elements of an integer tensor, widened to `i64`.
    ///
    /// Returns `None` for non-integer tensors.
    pub fn to_i64_vec(&self) -> Option<Vec<i64>> {
        match self {
            Constant::Int64(i) => Some(i.data.to_vec()),
            Constant::Int32(i) => Some(i.data.iter().map(|&x| x as i64).collect()),
            Constant::Float(_) => None,
        }
    }

    /// Return the value of an integer constant which holds exactly one
    /// element and is either a scalar or a vector of length 1.
    pub fn as_scalar_i64(&self) -> Option<i64> {
        if self.ndim() > 1 || self.len() != 1 {
            return None;
        }
        self.to_i64_vec().and_then(|v| v.first().copied())
    }

    /// Return the raw tensor payload as little-endian bytes.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        match self {
            Constant::Int64(i) => i.data.iter().flat_map(|x| x.to_le_bytes()).collect(),
            Constant::Int32(i) => i.data.iter().flat_map(|x| x.to_le_bytes()).collect(),
            Constant::Float(f) => f.data.iter().flat_map(|x| x.to_le_bytes()).collect(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ConstantNode<T> {
    name: Option<String>,
    shape: Vec<usize>,
    data: Arc<[T]>,
}

impl<T> ConstantNode<T> {
    pub fn new(name: Option<&str>, shape: &[usize], data: Arc<[T]>) -> Self {
        assert_eq!(
            shape.iter().product::<usize>(),
            data.len(),
            "constant data length does not match shape {:?}",
            shape
        );
        ConstantNode {
            name: name.map(|s| s.to_owned()),
            shape: shape.to_vec(),
            data,
        }
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }
}

macro_rules! impl_constant_node {
    ($scalar_type:ty, $variant:ident) => {
        impl From<ConstantNode<$scalar_type>> for Constant {
            fn from(node: ConstantNode<$scalar_type>) -> Constant {
                Constant::$variant(node)
            }
        }
    };
}

impl_constant_node!(i64, Int64);
impl_constant_node!(i32, Int32);
impl_constant_node!(f32, Float);

/// Extract typed data from a [`Constant`].
pub trait TypedConstant<T> {
    fn as_scalar(&self) -> Option<T>;
    fn as_vector(&self) -> Option<&[T]>;
}

macro_rules! impl_typed_constant {
    ($type:ty, $variant:ident) => {
        impl TypedConstant<$type> for Constant {
            fn as_scalar(&self) -> Option<$type> {
                match self {
                    Constant::$variant(node) if node.shape.is_empty() => {
                        node.data.first().copied()
                    }
                    _ => None,
                }
            }

            fn as_vector(&self) -> Option<&[$type]> {
                match self {
                    Constant::$variant(node) if node.shape.len() == 1 => Some(&node.data),
                    _ => None,
                }
            }
        }
    };
}

impl_typed_constant!(i64, Int64);
impl_typed_constant!(i32, Int32);
impl_typed_constant!(f32, Float);
