/// Resample `input` from `from` Hz to `to` Hz with linear interpolation.
/// Short speech snippets care about latency more than phase accuracy, so a
/// heavier filter bank is not worth the cost here.
pub(super) fn resample_to_rate(input: &[f32], from: u32, to: u32) -> Vec<f32> {
    if from == 0 || to == 0 || from == to || input.is_empty() {
        return input.to_vec();
    }
    resample_linear(input, to as f32 / from as f32)
}

pub(super) fn resample_linear(input: &[f32], ratio: f32) -> Vec<f32> {
    let input_len = input.len();
    let output_len = (input_len as f32 * ratio).round() as usize;
    let mut output = Vec::with_capacity(output_len);

    for i in 0..output_len {
        let src_idx = i as f32 / ratio;
        let idx = src_idx.floor() as usize;
        let frac = src_idx - idx as f32;

        if idx + 1 < input_len {
            let sample = input[idx] * (1.0 - frac) + input[idx + 1] * frac;
            output.push(sample);
        } else {
            let pad = input.last().copied().unwrap_or(0.0);
            output.push(pad);
        }
    }

    output
}
