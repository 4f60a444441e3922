use super::Expr;

use std::ops;

#[derive(Debug, Clone, PartialEq)]
pub struct ExprOr {
    pub operands: Vec<Expr>,
}

impl Expr {
    pub fn or(lhs: impl Into<Expr>, rhs: impl Into<Expr>) -> Expr {
        let mut lhs = lhs.into();
        let rhs = rhs.into();

        match (&mut lhs, rhs) {
            (Expr::Or(lhs_or), Expr::Or(rhs_or)) => {
                lhs_or.operands.extend(rhs_or.operands);
                lhs
            }
            (Expr::Or(lhs_or), rhs) => {
                lhs_or.operands.push(rhs);
                lhs
            }
            (_, Expr::Or(mut rhs_or)) => {
                rhs_or.operands.insert(0, lhs);
                rhs_or.into()
            }
            (_, rhs) => ExprOr {
                operands: vec![lhs, rhs],
            }
            .into(),
        }
    }

    pub fn or_from_vec(operands: Vec<Expr>) -> Expr {
        if operands.is_empty() {
            return Expr::always_false();
        }

        if operands.len() == 1 {
            return operands.into_iter().next().unwrap();
        }

        ExprOr { operands }.into()
    }
}

impl ops::Deref for ExprOr {
    type Target = [Expr];

    fn deref(&self) -> &Self::Target {
        self.operands.deref()
    }
}

impl<'a> IntoIterator for &'a ExprOr {
    type IntoIter = std::slice::Iter<'a, Expr>;
    type Item = &'a Expr;

    fn into_iter(self) -> Self::IntoIter {
        self.operands.iter()
    }
}

impl From<ExprOr> for Expr {
    fn from(value: ExprOr) -> Self {
        Expr::Or(value)
    }
}
