//! 表达式引擎集成测试
//!
//! 测试从文本或外部字节到规则安装、求值、打印的完整工作流。

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use expr_engine::ast::Expr;
use expr_engine::compiler::lower;
use expr_engine::{
    BlockValidator, EvalError, Evaluator, ExprBlock, ExprError, Field, Node, Opcode, Operand,
    PacketRecord, RuleEntry, RuleSet, RuleStore, ValidatorConfig, Value, compile, print,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn record(mark: u32) -> PacketRecord {
    PacketRecord::default().with_mark(mark)
}

fn eval(block: &ExprBlock, record: &PacketRecord) -> Value {
    BlockValidator::default().validate(block).unwrap();
    Evaluator::evaluate(block, record).unwrap()
}

// ==================== 基本场景 ====================

#[test]
fn test_immediate_addition() {
    let block = ExprBlock::new(vec![Node::immediate(Opcode::Add, 4, 2)]);
    assert_eq!(eval(&block, &PacketRecord::default()), 6);
}

#[test]
fn test_immediate_plus_mark() {
    let block = ExprBlock::new(vec![Node::new(
        Opcode::Add,
        Operand::Immediate(1),
        Operand::field(Field::Mark),
    )]);
    assert_eq!(eval(&block, &record(5)), 6);
}

#[test]
fn test_nested_sub_expressions() {
    let block = ExprBlock::new(vec![
        Node::new(Opcode::Add, Operand::Sub, Operand::Sub),
        Node::immediate(Opcode::Add, 1, 2),
        Node::immediate(Opcode::Add, 3, 4),
    ]);
    assert_eq!(
        Evaluator::evaluate_from(&block, 0, &PacketRecord::default()),
        Ok((10, 3))
    );
    assert_eq!(eval(&block, &PacketRecord::default()), 10);
}

#[test]
fn test_conditional_block() {
    let block = ExprBlock::new(vec![
        Node::new(Opcode::If, Operand::field(Field::Mark), Operand::Sub),
        Node::immediate(Opcode::Else, 11, 22),
    ]);
    assert_eq!(eval(&block, &record(0)), 22);
    assert_eq!(eval(&block, &record(3)), 11);
}

// ==================== 文本往返测试 ====================

#[test]
fn test_round_trip_representative_expressions() {
    let cases = [
        ("4+2", "4 + 2"),
        ("mark+1", "mark + 1"),
        ("ctmark==0", "ctmark == 0"),
        ("mark?10:20", "mark ? 10 : 20"),
        ("(mark + 1) * 2", "(mark + 1) * 2"),
        ("nfmark & 0xff", "mark & 255"),
    ];

    for (text, canonical) in cases {
        let block = compile(text).unwrap();
        let printed = print(&block).unwrap();
        assert_eq!(printed, canonical, "input {}", text);

        let recompiled = compile(&printed).unwrap();
        assert_eq!(recompiled, block, "input {}", text);
    }
}

#[test]
fn test_compiled_matches_hand_built() {
    let compiled = compile("mark ? 10 : 20").unwrap();
    let hand_built = ExprBlock::new(vec![
        Node::new(Opcode::If, Operand::field(Field::Mark), Operand::Sub),
        Node::immediate(Opcode::Else, 10, 20),
    ]);
    assert_eq!(compiled, hand_built);

    for mark in [0, 1, 7] {
        assert_eq!(eval(&compiled, &record(mark)), eval(&hand_built, &record(mark)));
    }
}

// ==================== 不可信输入测试 ====================

#[test]
fn test_decode_untrusted_wire_bytes() {
    let validator = BlockValidator::default();
    let bytes = compile("ctmark == 0 && mark > 1").unwrap().encode();

    let block = validator.decode(&bytes).unwrap();
    assert_eq!(print(&block).unwrap(), "ctmark == 0 && mark > 1");
    assert_eq!(eval(&block, &record(2)), 1);
    assert_eq!(eval(&block, &record(2).with_ctmark(1)), 0);
}

#[test]
fn test_rejects_truncated_and_padded_bytes() {
    let validator = BlockValidator::default();
    let bytes = compile("(1 + 2) + (3 + 4)").unwrap().encode();

    assert!(validator.decode(&bytes[..bytes.len() - 1]).is_err());

    let mut padded = bytes.clone();
    padded.push(0);
    assert!(validator.decode(&padded).is_err());

    assert!(validator.decode(&[]).is_err());
}

#[test]
fn test_rejects_declared_count_mismatch() {
    // 声明 2 个节点，但根节点两侧均为立即数，只消费 1 个
    let block = ExprBlock::new(vec![
        Node::immediate(Opcode::Add, 1, 2),
        Node::immediate(Opcode::Add, 3, 4),
    ]);
    let bytes = block.encode();
    assert!(matches!(
        BlockValidator::default().decode(&bytes),
        Err(ExprError::NodeCountMismatch {
            declared: 2,
            consumed: 1
        })
    ));
}

#[test]
fn test_rejects_over_read() {
    let block = ExprBlock::new(vec![Node::new(Opcode::Add, Operand::Sub, Operand::Sub)]);
    assert!(matches!(
        BlockValidator::default().validate(&block),
        Err(ExprError::OverRead { .. })
    ));
    assert_eq!(
        Evaluator::evaluate(&block, &PacketRecord::default()),
        Err(EvalError::OutOfBounds(1))
    );
}

#[test]
fn test_rejects_unknown_field() {
    let block = ExprBlock::new(vec![Node::new(
        Opcode::Add,
        Operand::Field(42),
        Operand::Immediate(1),
    )]);
    assert!(matches!(
        BlockValidator::default().validate(&block),
        Err(ExprError::UnknownField { index: 0, raw: 42 })
    ));
}

#[test]
fn test_rejects_excessive_depth() {
    let validator = BlockValidator::new(ValidatorConfig {
        max_depth: 4,
        ..ValidatorConfig::default()
    });
    assert!(validator.validate(&compile("mark + (mark + (mark + 1))").unwrap()).is_ok());
    assert!(matches!(
        validator.validate(&compile("mark + (mark + (mark + (mark + (mark + 1))))").unwrap()),
        Err(ExprError::DepthExceeded { max: 4 })
    ));
}

#[test]
fn test_rejects_reserved_operations() {
    for opcode in [Opcode::Assign, Opcode::Offset, Opcode::Deref] {
        let block = ExprBlock::new(vec![Node::immediate(opcode, 1, 2)]);
        assert!(matches!(
            BlockValidator::default().validate(&block),
            Err(ExprError::UnsupportedOperation { .. })
        ));
        assert_eq!(
            Evaluator::evaluate(&block, &PacketRecord::default()),
            Err(EvalError::UnsupportedOperation(opcode))
        );
    }
}

// ==================== 规则存储工作流 ====================

#[test]
fn test_full_workflow_with_store() {
    // 1. 创建存储
    let store = RuleStore::new();

    // 2. 从规则集加载，混合文本与线上格式
    let wire = STANDARD.encode(compile("l4proto == 6").unwrap().encode());
    let set = RuleSet::from_toml(&format!(
        r#"
        [[rules]]
        name = "unmarked"
        expr = "ctmark == 0"

        [[rules]]
        name = "tcp"
        block = "{}"

        [[rules]]
        name = "high-mark"
        expr = "mark >= 0x100"
        "#,
        wire
    ))
    .unwrap();
    let report = store.apply(&set).unwrap();
    assert_eq!(report.installed, 3);

    // 3. 逐条记录求值
    let tcp = PacketRecord {
        l4proto: 6,
        ..PacketRecord::default()
    };
    assert_eq!(store.matching(&tcp), vec!["tcp", "unmarked"]);
    assert_eq!(
        store.matching(&record(0x200).with_ctmark(1)),
        vec!["high-mark"]
    );

    // 4. 替换规则，旧快照不受影响
    let before = store.get("high-mark").unwrap();
    store.replace("high-mark", "mark >= 0x1000").unwrap();
    assert!(before.matches(&record(0x200)));
    assert!(!store.matches("high-mark", &record(0x200)).unwrap());

    // 5. 规则选项输出
    assert_eq!(
        store.get("tcp").unwrap().to_rule_option(),
        "--expr 'l4proto == 6'"
    );
}

#[test]
fn test_rule_set_rejection_keeps_store() {
    let store = RuleStore::new();
    store
        .apply(&RuleSet {
            rules: vec![RuleEntry::text("a", "mark == 1")],
        })
        .unwrap();

    let bad_block = ExprBlock::new(vec![Node::new(Opcode::If, Operand::Immediate(1), Operand::Sub)]);
    let result = store.apply(&RuleSet {
        rules: vec![
            RuleEntry::text("a", "mark == 2"),
            RuleEntry::bytes("b", &bad_block.encode()),
        ],
    });
    assert!(result.is_err());
    assert_eq!(store.list_ids(), vec!["a"]);
    assert!(store.matches("a", &record(1)).unwrap());
}

// ==================== 随机表达式测试 ====================

const RANDOM_FIELDS: [Field; 4] = [Field::Mark, Field::CtMark, Field::SecMark, Field::L4Offset];
const RANDOM_UNARY: [Opcode; 3] = [Opcode::Neg, Opcode::LogicalNot, Opcode::BitNot];
const RANDOM_BINARY: [Opcode; 18] = [
    Opcode::Add,
    Opcode::Sub,
    Opcode::Mul,
    Opcode::Div,
    Opcode::Mod,
    Opcode::Lt,
    Opcode::Le,
    Opcode::Eq,
    Opcode::Ne,
    Opcode::Gt,
    Opcode::Ge,
    Opcode::LogicalAnd,
    Opcode::LogicalOr,
    Opcode::Shl,
    Opcode::Shr,
    Opcode::BitAnd,
    Opcode::BitOr,
    Opcode::BitXor,
];

fn random_expr(rng: &mut StdRng, depth: usize) -> Expr {
    let choice = if depth == 0 { rng.random_range(0..2) } else { rng.random_range(0..5) };
    match choice {
        0 => Expr::Literal(Value::from(rng.random_range(0u32..1000))),
        1 => Expr::Field(RANDOM_FIELDS[rng.random_range(0..RANDOM_FIELDS.len())]),
        2 => Expr::unary(
            RANDOM_UNARY[rng.random_range(0..RANDOM_UNARY.len())],
            random_expr(rng, depth - 1),
        ),
        3 => Expr::conditional(
            random_expr(rng, depth - 1),
            random_expr(rng, depth - 1),
            random_expr(rng, depth - 1),
        ),
        _ => Expr::binary(
            RANDOM_BINARY[rng.random_range(0..RANDOM_BINARY.len())],
            random_expr(rng, depth - 1),
            random_expr(rng, depth - 1),
        ),
    }
}

fn random_record(rng: &mut StdRng) -> PacketRecord {
    PacketRecord {
        mark: rng.random(),
        ctmark: rng.random_bool(0.5).then(|| rng.random()),
        secmark: rng.random_range(0..16),
        l4offset: rng.random_range(0..64),
        ..PacketRecord::default()
    }
}

#[test]
fn test_random_trees_consume_exactly_and_are_deterministic() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let validator = BlockValidator::default();

    for _ in 0..500 {
        let expr = random_expr(&mut rng, 6);
        let block = lower(&expr);
        validator.validate(&block).unwrap();

        let input = random_record(&mut rng);
        let (value, next) = Evaluator::evaluate_from(&block, 0, &input).unwrap();
        assert_eq!(next, block.len(), "expr {}", expr);
        assert_eq!(Evaluator::evaluate(&block, &input), Ok(value));

        // 线上格式往返后结果不变
        let decoded = validator.decode(&block.encode()).unwrap();
        assert_eq!(Evaluator::evaluate(&decoded, &input), Ok(value));

        // 打印后重新编译，语义不变且文本稳定
        let printed = print(&block).unwrap();
        let recompiled = compile(&printed).unwrap();
        assert_eq!(Evaluator::evaluate(&recompiled, &input), Ok(value), "text {}", printed);
        assert_eq!(print(&recompiled).unwrap(), printed);
    }
}

// ==================== 示例规则集 ====================

#[test]
fn test_example_rule_set() {
    let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("../../rules/example.toml");
    let set = RuleSet::load(&path).unwrap();

    let store = RuleStore::new();
    store.apply(&set).unwrap();
    assert_eq!(store.len(), 4);
    assert_eq!(store.get("ctmark-two").unwrap().display(), "ctmark == 2");

    let packet = PacketRecord {
        mark: 0x2003,
        ctmark: Some(2),
        l4proto: 6,
        l4offset: 20,
        ..PacketRecord::default()
    };
    assert_eq!(
        store.matching(&packet),
        vec!["ctmark-two", "low-nibble", "tcp-high-mark"]
    );
}
