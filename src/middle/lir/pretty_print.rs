use colored::Colorize;
use itertools::Itertools;

use crate::{
    index::Index,
    middle::lir::{
        self, BinaryOperator, BlockCall, CastKind, Condition, Constant, InstructionKind,
        Terminator, ValueDefinition, ValueId,
    },
};

pub fn pretty_print_lir(module: &lir::Module) {
    print!("{module}");
}

impl core::fmt::Display for lir::Module {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for global in self.globals.iter() {
            write_global(f, self, global)?;
        }

        for (i, function) in self.functions.iter().enumerate() {
            if i > 0 || !self.globals.is_empty() {
                writeln!(f)?;
            }

            FunctionPrinter {
                module: Some(self),
                function,
            }
            .write(f)?;
        }

        Ok(())
    }
}

impl core::fmt::Display for lir::Function {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        FunctionPrinter {
            module: None,
            function: self,
        }
        .write(f)
    }
}

fn write_global(
    f: &mut std::fmt::Formatter<'_>,
    module: &lir::Module,
    global: &lir::GlobalData,
) -> std::fmt::Result {
    write!(f, "{} ", "global".magenta())?;

    if global.is_mutable {
        write!(f, "{} ", "mut".magenta())?;
    }

    write!(
        f,
        "{} = [{}] {} {}",
        global.name.value().blue(),
        global
            .bytes
            .iter()
            .map(|byte| format!("{byte:02x}"))
            .join(" ")
            .purple(),
        "align".cyan(),
        global.align.to_string().purple()
    )?;

    for relocation in &global.relocations {
        let target = module
            .globals
            .get(relocation.target)
            .map_or_else(|| format!("global{}", relocation.target.index()), |data| {
                data.name.value().to_owned()
            });

        write!(
            f,
            ", {} {} {}",
            relocation.offset.to_string().purple(),
            "->".white(),
            format!("@{target}").blue()
        )?;
    }

    writeln!(f)
}

struct FunctionPrinter<'a> {
    module: Option<&'a lir::Module>,
    function: &'a lir::Function,
}

impl FunctionPrinter<'_> {
    fn write(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let function = self.function;

        write!(
            f,
            "{} {}({})",
            "fn".magenta(),
            function.name.value().blue(),
            function.signature.parameters.iter().join(", ")
        )?;

        if let Some(returns) = function.signature.returns {
            write!(f, " -> {returns}")?;
        }

        writeln!(f, " {{")?;

        for (id, slot) in function.stack_slots.enumerate() {
            write!(
                f,
                "    {} = {} {}, {} {}",
                format!("slot{}", id.index()).yellow(),
                "stack".cyan(),
                slot.size.to_string().purple(),
                "align".cyan(),
                slot.align.to_string().purple()
            )?;

            if let Some(name) = slot.name {
                write!(f, " ; {name}")?;
            }

            writeln!(f)?;
        }

        for (id, block) in function.blocks.enumerate() {
            write!(f, "{}", format!("bb{}", id.index()).bright_red())?;

            if !block.parameters.is_empty() {
                let parameters = block
                    .parameters
                    .iter()
                    .map(|value| format!("{}: {}", self.value(*value), self.ty(*value)))
                    .join(", ");

                write!(f, "({parameters})")?;
            }

            writeln!(f, ":")?;

            for instruction in &block.instructions {
                write!(f, "    ")?;

                if let Some(result) = instruction.result {
                    write!(f, "{} {} ", self.value(result), "=".white())?;
                }

                self.write_instruction(f, &instruction.kind)?;
                writeln!(f)?;
            }

            if let Some(terminator) = &block.terminator {
                write!(f, "    ")?;
                self.write_terminator(f, terminator)?;
                writeln!(f)?;
            }
        }

        writeln!(f, "}}")
    }

    fn ty(&self, value: ValueId) -> String {
        self.function
            .values
            .get(value)
            .map_or_else(String::new, |data| data.ty.to_string())
    }

    /// A value operand; constants are printed in place
    fn value(&self, value: ValueId) -> String {
        let Some(data) = self.function.values.get(value) else {
            return format!("%{}", value.index()).red().to_string();
        };

        match data.definition {
            ValueDefinition::Constant(Constant::Integer(integer)) => {
                integer.to_string().purple().to_string()
            }
            ValueDefinition::Constant(Constant::Null) => "null".purple().to_string(),
            ValueDefinition::Constant(Constant::StackSlot(slot)) => {
                format!("slot{}", slot.index()).yellow().to_string()
            }
            ValueDefinition::Constant(Constant::Global(global)) => {
                let name = self
                    .module
                    .and_then(|module| module.globals.get(global))
                    .map_or_else(|| format!("global{}", global.index()), |data| {
                        data.name.value().to_owned()
                    });

                format!("@{name}").blue().to_string()
            }
            ValueDefinition::Constant(Constant::Function(id)) => self.function_name(id),
            ValueDefinition::Instruction(_) | ValueDefinition::Parameter(..) => {
                format!("%{}", value.index()).yellow().to_string()
            }
        }
    }

    fn function_name(&self, id: lir::FunctionId) -> String {
        let name = self
            .module
            .and_then(|module| module.functions.get(id))
            .map_or_else(|| format!("fn{}", id.index()), |function| {
                function.name.value().to_owned()
            });

        format!("@{name}").blue().to_string()
    }

    fn values(&self, values: &[ValueId]) -> String {
        values.iter().map(|value| self.value(*value)).join(", ")
    }

    fn block_call(&self, call: &BlockCall) -> String {
        let label = format!("bb{}", call.block.index()).blue();

        if call.arguments.is_empty() {
            label.to_string()
        } else {
            format!("{label}({})", self.values(&call.arguments))
        }
    }

    fn write_instruction(
        &self,
        f: &mut std::fmt::Formatter<'_>,
        instruction: &InstructionKind,
    ) -> std::fmt::Result {
        match instruction {
            InstructionKind::Load { ty, address } => {
                write!(f, "{} {ty} {}", "load".cyan(), self.value(*address))
            }
            InstructionKind::Store { address, value } => write!(
                f,
                "{} {} {}, {}",
                "store".cyan(),
                self.ty(*value),
                self.value(*value),
                self.value(*address)
            ),
            InstructionKind::Binary { operator, lhs, rhs } => write!(
                f,
                "{} {} {}, {}",
                operator.to_string().cyan(),
                self.ty(*lhs),
                self.value(*lhs),
                self.value(*rhs)
            ),
            InstructionKind::Compare {
                condition,
                lhs,
                rhs,
            } => write!(
                f,
                "{} {} {}, {}",
                format!("cmp.{condition}").cyan(),
                self.ty(*lhs),
                self.value(*lhs),
                self.value(*rhs)
            ),
            InstructionKind::Cast { kind, value, to } => write!(
                f,
                "{} {} {} {} {to}",
                kind.to_string().cyan(),
                self.ty(*value),
                self.value(*value),
                "to".cyan()
            ),
            InstructionKind::Gep {
                base,
                offset,
                index,
            } => {
                write!(
                    f,
                    "{} {}, {}",
                    "gep".cyan(),
                    self.value(*base),
                    offset.to_string().purple()
                )?;

                if let Some((index, stride)) = index {
                    write!(
                        f,
                        " + {} * {}",
                        self.value(*index),
                        stride.to_string().purple()
                    )?;
                }

                Ok(())
            }
            InstructionKind::Copy {
                destination,
                source,
                size,
            } => write!(
                f,
                "{} {}, {}, {}",
                "copy".cyan(),
                self.value(*destination),
                self.value(*source),
                size.to_string().purple()
            ),
            InstructionKind::Call { callee, arguments } => write!(
                f,
                "{} {}({})",
                "call".cyan(),
                self.function_name(*callee),
                self.values(arguments)
            ),
            InstructionKind::CallIndirect {
                callee, arguments, ..
            } => write!(
                f,
                "{} {}({})",
                "call_indirect".cyan(),
                self.value(*callee),
                self.values(arguments)
            ),
        }
    }

    fn write_terminator(
        &self,
        f: &mut std::fmt::Formatter<'_>,
        terminator: &Terminator,
    ) -> std::fmt::Result {
        match terminator {
            Terminator::Jump(target) => {
                write!(f, "{} {}", "jump".cyan(), self.block_call(target))
            }
            Terminator::Branch {
                condition,
                then,
                otherwise,
            } => write!(
                f,
                "{} {}, {}, {}",
                "branch".cyan(),
                self.value(*condition),
                self.block_call(then),
                self.block_call(otherwise)
            ),
            Terminator::Return(Some(value)) => {
                write!(f, "{} {}", "return".cyan(), self.value(*value))
            }
            Terminator::Return(None) => write!(f, "{}", "return".cyan()),
        }
    }
}

impl core::fmt::Display for lir::Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            lir::Type::I8 => "i8",
            lir::Type::I16 => "i16",
            lir::Type::I32 => "i32",
            lir::Type::I64 => "i64",
            lir::Type::Ptr => "ptr",
        })
    }
}

impl core::fmt::Display for BinaryOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            BinaryOperator::Add => "add",
            BinaryOperator::Sub => "sub",
            BinaryOperator::Mul => "mul",
            BinaryOperator::SDiv => "sdiv",
            BinaryOperator::UDiv => "udiv",
            BinaryOperator::SRem => "srem",
            BinaryOperator::URem => "urem",
            BinaryOperator::And => "and",
            BinaryOperator::Or => "or",
            BinaryOperator::Xor => "xor",
            BinaryOperator::Shl => "shl",
            BinaryOperator::LShr => "lshr",
            BinaryOperator::AShr => "ashr",
        })
    }
}

impl core::fmt::Display for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Condition::Eq => "eq",
            Condition::Ne => "ne",
            Condition::SLt => "slt",
            Condition::SLe => "sle",
            Condition::SGt => "sgt",
            Condition::SGe => "sge",
            Condition::ULt => "ult",
            Condition::ULe => "ule",
            Condition::UGt => "ugt",
            Condition::UGe => "uge",
        })
    }
}

impl core::fmt::Display for CastKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            CastKind::Trunc => "trunc",
            CastKind::SExt => "sext",
            CastKind::ZExt => "zext",
            CastKind::PtrToInt => "ptrtoint",
            CastKind::IntToPtr => "inttoptr",
        })
    }
}
