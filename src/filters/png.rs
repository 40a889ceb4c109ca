use std::mem;

use crate::error::DecompressError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterType {
    None,
    Sub,
    Up,
    Avg,
    Paeth,
}

impl TryFrom<u8> for FilterType {
    type Error = DecompressError;

    fn try_from(n: u8) -> Result<FilterType, DecompressError> {
        match n {
            0 => Ok(FilterType::None),
            1 => Ok(FilterType::Sub),
            2 => Ok(FilterType::Up),
            3 => Ok(FilterType::Avg),
            4 => Ok(FilterType::Paeth),
            _ => Err(DecompressError::Predictor(format!("invalid PNG filter type ({n})"))),
        }
    }
}

fn paeth(left: u8, above: u8, upper_left: u8) -> u8 {
    let estimate = i16::from(left) + i16::from(above) - i16::from(upper_left);
    let distance = |value: u8| (estimate - i16::from(value)).abs();
    if distance(left) <= distance(above) && distance(left) <= distance(upper_left) {
        left
    } else if distance(above) <= distance(upper_left) {
        above
    } else {
        upper_left
    }
}

/// Reverses one filtered row in place. `previous` is the already decoded row above
/// (all zeros for the first row).
pub fn decode_row(filter: FilterType, bpp: usize, previous: &[u8], current: &mut [u8]) {
    for i in 0..current.len() {
        let left = if i >= bpp { current[i - bpp] } else { 0 };
        let above = previous[i];
        let upper_left = if i >= bpp { previous[i - bpp] } else { 0 };
        let predicted = match filter {
            FilterType::None => 0,
            FilterType::Sub => left,
            FilterType::Up => above,
            FilterType::Avg => ((u16::from(left) + u16::from(above)) / 2) as u8,
            FilterType::Paeth => paeth(left, above, upper_left),
        };
        current[i] = current[i].wrapping_add(predicted);
    }
}

/// Undoes PNG row filters. Each row of `bytes_per_row` bytes is preceded by its filter type.
pub fn decode_frame(content: &[u8], bytes_per_pixel: usize, bytes_per_row: usize) -> Result<Vec<u8>, DecompressError> {
    if bytes_per_row == 0 {
        return Err(DecompressError::Predictor("zero-width rows".to_string()));
    }
    let mut previous = vec![0_u8; bytes_per_row];
    let mut current = vec![0_u8; bytes_per_row];
    let mut decoded = Vec::with_capacity(content.len());

    for row in content.chunks(bytes_per_row + 1) {
        let filter = FilterType::try_from(row[0])?;
        let data = &row[1..];
        if data.len() != bytes_per_row {
            return Err(DecompressError::Predictor(format!(
                "truncated row of {} bytes, expected {bytes_per_row}",
                data.len()
            )));
        }
        current.copy_from_slice(data);
        decode_row(filter, bytes_per_pixel, &previous, &mut current);
        decoded.extend_from_slice(&current);
        mem::swap(&mut previous, &mut current);
    }
    Ok(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn up_and_sub_rows() {
        // Two rows of three bytes: "Sub" then "Up".
        let content = [1, 10, 1, 1, 2, 5, 5, 5];
        let decoded = decode_frame(&content, 1, 3).unwrap();
        assert_eq!(decoded, vec![10, 11, 12, 15, 16, 17]);
    }

    #[test]
    fn average_uses_wide_arithmetic() {
        let content = [3, 200, 0, 3, 0, 0];
        let decoded = decode_frame(&content, 1, 2).unwrap();
        // Second row: 200 / 2 from above, then (100 + 100) / 2.
        assert_eq!(decoded, vec![200, 100, 100, 100]);
    }

    #[test]
    fn paeth_picks_the_nearest_neighbour() {
        assert_eq!(paeth(10, 20, 10), 20);
        assert_eq!(paeth(20, 10, 10), 20);
        assert_eq!(paeth(5, 5, 5), 5);
        // Estimate 30 + 40 - 60 = 10 is closest to the left byte.
        assert_eq!(paeth(30, 40, 60), 30);
    }

    #[test]
    fn unknown_filter_type_fails() {
        assert!(decode_frame(&[9, 0, 0], 1, 2).is_err());
    }
}
