use serde::{Deserialize, Serialize};

/// Factor between two units of measure.
///
/// Unit types are `W` (weight) or `V` (volume). Conversions that cross types
/// go through the product's specific gravity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UomConversion {
    pub from_uom: i64,
    pub to_uom: i64,
    pub factor: f64,
    pub from_uom_type: String,
    pub to_uom_type: String,
}

impl UomConversion {
    /// `VW`, `WV`, `WW` or `VV`.
    pub fn conversion_type(&self) -> String {
        format!("{}{}", self.from_uom_type, self.to_uom_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversion_type_concatenates_unit_types() {
        let c = UomConversion {
            from_uom: 1,
            to_uom: 2,
            factor: 0.159,
            from_uom_type: "V".into(),
            to_uom_type: "W".into(),
        };
        assert_eq!(c.conversion_type(), "VW");
    }
}
