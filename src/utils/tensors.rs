use burn::tensor::{backend::Backend, Data, ElementConversion, Int, Shape, Tensor};

/// Build a 1D integer tensor, typically span positions for a batch
pub fn int_tensor_1d<B: Backend>(values: Vec<usize>, device: &B::Device) -> Tensor<B, 1, Int> {
    let len = values.len();

    Tensor::from_data(
        Data::new(
            values.into_iter().map(|v| (v as i64).elem()).collect(),
            Shape::new([len]),
        ),
        device,
    )
}

/// Split a 2D float tensor into one vector per row
pub fn to_rows<B: Backend>(tensor: Tensor<B, 2>) -> Vec<Vec<f32>> {
    let [_, seq_length] = tensor.dims();

    if seq_length == 0 {
        return Vec::new();
    }

    tensor
        .into_data()
        .convert::<f32>()
        .value
        .chunks(seq_length)
        .map(|row| row.to_vec())
        .collect()
}
