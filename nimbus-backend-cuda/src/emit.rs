#![forbid(unsafe_code)]

use nimbus_ast::{Expr, ExprKind, Span, Type, Value};

use crate::error::CudaBackendError;

const INDENT: &str = "    ";
const MAX_THREADS_PER_BLOCK: u32 = 512;
const MAX_BLOCKS: u32 = 32;

/// C++ spellings of the binary primitives.
fn prim_binary(name: &str) -> Option<&'static str> {
    Some(match name {
        "+" => "+",
        "-" => "-",
        "*" => "*",
        "/" => "/",
        "%" => "%",
        ">" => ">",
        ">=" => ">=",
        "<" => "<",
        "<=" => "<=",
        "==" => "==",
        "!=" => "!=",
        "or" => "||",
        "and" => "&&",
        "xor" => "^",
        _ => return None,
    })
}

/// C++ spellings of the remaining primitives.
fn prim_other(name: &str) -> Option<&'static str> {
    Some(match name {
        "print" => "printf",
        "not" => "!",
        "rand" => "(int) random",
        "srand" => "srandom",
        "time" => "time",
        _ => return None,
    })
}

/// Variable names may contain '.' (the implicit size entries); C identifiers
/// may not.
fn c_ident(name: &str) -> String {
    name.replace('.', "_")
}

fn c_type(span: Span, ty: Type) -> Result<&'static str, CudaBackendError> {
    match ty {
        Type::Int => Ok("int"),
        Type::Float => Ok("float"),
        Type::String => Ok("const char *"),
        Type::ListInt => Ok("int *"),
        Type::ListFloat => Ok("float *"),
        Type::ListString => Ok("const char **"),
        Type::Undetermined | Type::Unit => Err(CudaBackendError::at(
            span,
            format!("no C type for {}", ty.display()),
        )),
    }
}

/// Generated sources for one compiled module.
#[derive(Debug)]
pub struct CudaArtifacts {
    pub host_cpp: String,
    pub host_hpp: String,
    pub device_cu: String,
    pub device_cuh: String,
    pub makefile: String,
    pub kernel_count: usize,
}

/// Emit the host C++, device CUDA, headers, and Makefile for a checked and
/// analyzed program. `module` is the extensionless output file stem.
pub fn emit_program(module: &str, exprs: &[Expr]) -> Result<CudaArtifacts, CudaBackendError> {
    let mut r#gen = Generator::new();

    let mut defs = String::new();
    let mut main_body = String::new();
    let mut device = String::new();

    for expr in exprs {
        match &expr.kind {
            ExprKind::PrimFunc { .. } => {}
            ExprKind::Define { .. } => {
                let (cpp, cuda) = r#gen.translate_stmt(expr)?;
                defs.push_str(&cpp);
                device.push_str(&cuda);
            }
            _ => {
                let (cpp, cuda) = r#gen.translate_stmt(expr)?;
                main_body.push_str(&cpp);
                device.push_str(&cuda);
            }
        }
    }

    let mut host_cpp = String::new();
    host_cpp.push_str("#include <cuda_runtime.h>\n");
    host_cpp.push_str("#include <stdio.h>\n");
    host_cpp.push_str("#include <stdlib.h>\n");
    host_cpp.push_str("#include <time.h>\n");
    host_cpp.push('\n');
    host_cpp.push_str(&format!("#include \"{module}.hpp\"\n"));
    host_cpp.push_str(&format!("#include \"{module}.cuh\"\n"));
    host_cpp.push('\n');
    host_cpp.push_str(&defs);
    host_cpp.push_str("int main(void) {\n");
    host_cpp.push_str(&indent_block(&main_body));
    host_cpp.push_str("    return 0;\n");
    host_cpp.push_str("}\n");

    let mut device_cu = String::new();
    device_cu.push_str("#include <cuda_runtime.h>\n");
    device_cu.push('\n');
    device_cu.push_str(&format!("#include \"{module}.cuh\"\n"));
    device_cu.push('\n');
    device_cu.push_str(&device);

    Ok(CudaArtifacts {
        host_cpp,
        host_hpp: r#gen.cpp_prototypes.concat(),
        device_cu,
        device_cuh: r#gen.cuda_prototypes.concat(),
        makefile: makefile(module),
        kernel_count: r#gen.kernel_counter,
    })
}

/// Prepend one indent level to every non-empty line.
fn indent_block(code: &str) -> String {
    let mut out = String::with_capacity(code.len());
    for line in code.split_inclusive('\n') {
        if line != "\n" {
            out.push_str(INDENT);
        }
        out.push_str(line);
    }
    out
}

struct Generator {
    cpp_prototypes: Vec<String>,
    cuda_prototypes: Vec<String>,
    kernel_counter: usize,
}

impl Generator {
    fn new() -> Self {
        Self {
            cpp_prototypes: Vec::new(),
            cuda_prototypes: Vec::new(),
            kernel_counter: 0,
        }
    }

    /// Translate one expression in statement position. The returned host code
    /// is newline-terminated; the device string carries any kernels generated
    /// below this point.
    fn translate_stmt(&mut self, expr: &Expr) -> Result<(String, String), CudaBackendError> {
        match &expr.kind {
            ExprKind::Literal(_) | ExprKind::GetVar { .. } | ExprKind::ListAt { .. } => {
                Ok((format!("{};\n", self.translate_value(expr)?), String::new()))
            }

            ExprKind::CreateVar { name, init } => {
                let ty = c_type(expr.span, expr.ty)?;
                let init = self.translate_value(init)?;
                let sep = if ty.ends_with('*') { "" } else { " " };
                Ok((
                    format!("{ty}{sep}{} = {init};\n", c_ident(name)),
                    String::new(),
                ))
            }

            ExprKind::SetVar { name, value } => {
                let value = self.translate_value(value)?;
                Ok((format!("{} = {value};\n", c_ident(name)), String::new()))
            }

            ExprKind::Define {
                name,
                ret,
                params,
                body,
            } => self.translate_define(expr.span, name, *ret, params, body),

            ExprKind::Call { .. } => {
                Ok((format!("{};\n", self.translate_value(expr)?), String::new()))
            }

            ExprKind::If {
                cond,
                then_body,
                else_body,
            } => {
                let mut cuda = String::new();
                let mut cpp = format!("if ({}) {{\n", self.translate_value(cond)?);
                for e in then_body {
                    let (c, cu) = self.translate_stmt(e)?;
                    cpp.push_str(&indent_block(&c));
                    cuda.push_str(&cu);
                }
                cpp.push_str("} else {\n");
                for e in else_body {
                    let (c, cu) = self.translate_stmt(e)?;
                    cpp.push_str(&indent_block(&c));
                    cuda.push_str(&cu);
                }
                cpp.push_str("}\n");
                Ok((cpp, cuda))
            }

            ExprKind::Loop {
                init,
                test,
                update,
                body,
            } => {
                let init = self.translate_inline_stmt(init)?;
                let test = self.translate_value(test)?;
                let update = self.translate_inline_stmt(update)?;

                let mut cuda = String::new();
                let mut cpp = format!("for ({init}; {test}; {update}) {{\n");
                for e in body {
                    let (c, cu) = self.translate_stmt(e)?;
                    cpp.push_str(&indent_block(&c));
                    cuda.push_str(&cu);
                }
                cpp.push_str("}\n");
                Ok((cpp, cuda))
            }

            ExprKind::ParallelLoop {
                index,
                start,
                end,
                captured,
                body,
            } => self.translate_parallel_loop(expr, index, start, end, captured, body),

            ExprKind::List { name, elem, size } => {
                let elem_ty = c_type(expr.span, *elem)?;
                let size = self.translate_value(size)?;
                let name = c_ident(name);
                // The implicit size variable backs `<name>.size` references.
                Ok((
                    format!("int {name}_size = {size};\n{elem_ty} {name}[{size}];\n"),
                    String::new(),
                ))
            }

            ExprKind::ListSet { name, index, value } => {
                let index = self.translate_value(index)?;
                let value = self.translate_value(value)?;
                Ok((
                    format!("{}[{index}] = {value};\n", c_ident(name)),
                    String::new(),
                ))
            }

            ExprKind::PrimFunc { .. } => Ok((String::new(), String::new())),
        }
    }

    /// A statement stripped of its terminator, for `for (...)` headers.
    fn translate_inline_stmt(&mut self, expr: &Expr) -> Result<String, CudaBackendError> {
        let (stmt, _) = self.translate_stmt(expr)?;
        Ok(stmt.trim_end_matches('\n').trim_end_matches(';').to_string())
    }

    /// Translate an expression in value position.
    fn translate_value(&mut self, expr: &Expr) -> Result<String, CudaBackendError> {
        match &expr.kind {
            ExprKind::Literal(Value::Int(n)) => Ok(n.to_string()),
            ExprKind::Literal(Value::Float(f)) => Ok(format!("{f:?}")),
            ExprKind::Literal(Value::Str(s)) => Ok(format!("\"{s}\"")),

            ExprKind::GetVar { name } => Ok(c_ident(name)),

            ExprKind::ListAt { name, index } => {
                Ok(format!("{}[{}]", c_ident(name), self.translate_value(index)?))
            }

            ExprKind::Call { name, args } => self.translate_call(expr.span, name, args),

            _ => Err(CudaBackendError::at(
                expr.span,
                format!("{} is not a value expression", expr.kind.tag()),
            )),
        }
    }

    fn translate_call(
        &mut self,
        span: Span,
        name: &str,
        args: &[Expr],
    ) -> Result<String, CudaBackendError> {
        if let Some(op) = prim_binary(name) {
            if args.len() != 2 {
                return Err(CudaBackendError::at(
                    span,
                    format!("expected 2 arguments to {name} but got {}", args.len()),
                ));
            }
            let lhs = self.translate_value(&args[0])?;
            let rhs = self.translate_value(&args[1])?;
            return Ok(format!("({lhs} {op} {rhs})"));
        }

        let callee = match prim_other(name) {
            Some(c) => c.to_string(),
            None => c_ident(name),
        };

        let mut parts = Vec::with_capacity(args.len());
        for arg in args {
            parts.push(self.translate_value(arg)?);
        }
        Ok(format!("{callee}({})", parts.join(", ")))
    }

    fn translate_define(
        &mut self,
        span: Span,
        name: &str,
        ret: Type,
        params: &[nimbus_ast::Param],
        body: &[Expr],
    ) -> Result<(String, String), CudaBackendError> {
        let ret_ty = c_type(span, ret)?;

        let mut sig_params = Vec::with_capacity(params.len());
        for p in params {
            let ty = c_type(span, p.ty)?;
            let sep = if ty.ends_with('*') { "" } else { " " };
            sig_params.push(format!("{ty}{sep}{}", c_ident(&p.name)));
        }
        let sep = if ret_ty.ends_with('*') { "" } else { " " };
        let sig = format!("{ret_ty}{sep}{}({})", c_ident(name), sig_params.join(", "));
        self.cpp_prototypes.push(format!("{sig};\n"));

        let mut cuda = String::new();
        let mut body_cpp = String::new();
        let Some((last, rest)) = body.split_last() else {
            return Err(CudaBackendError::at(
                span,
                "expected one or more body expressions",
            ));
        };
        for e in rest {
            let (c, cu) = self.translate_stmt(e)?;
            body_cpp.push_str(&c);
            cuda.push_str(&cu);
        }

        // The last body expression is the return value.
        if !matches!(
            last.kind,
            ExprKind::Literal(_) | ExprKind::GetVar { .. } | ExprKind::Call { .. }
        ) {
            return Err(CudaBackendError::at(
                span,
                "expected literal, get, or call as last body expression",
            ));
        }
        body_cpp.push_str(&format!("return {};\n", self.translate_value(last)?));

        let cpp = format!("{sig} {{\n{}}}\n\n", indent_block(&body_cpp));
        Ok((cpp, cuda))
    }

    fn translate_parallel_loop(
        &mut self,
        expr: &Expr,
        index: &str,
        start: &Expr,
        end: &Expr,
        captured: &[String],
        body: &[Expr],
    ) -> Result<(String, String), CudaBackendError> {
        let Some(env) = &expr.env else {
            return Err(CudaBackendError::at(
                expr.span,
                "parallel loop is missing its environment snapshot",
            ));
        };

        self.kernel_counter += 1;
        let kernel = format!("cuda_loop{}_kernel", self.kernel_counter);

        // Split the captures by their declared type; scalars go to the kernel
        // by value, lists through device buffers.
        let mut kernel_params = vec!["int nb_start".to_string(), "int nb_end".to_string()];
        let mut launch_args = vec!["nb_start".to_string(), "nb_end".to_string()];
        let mut buffers: Vec<(String, &'static str)> = Vec::new();

        for name in captured {
            let ty = env
                .lookup_variable(expr.span, name)
                .map_err(|e| CudaBackendError::at(expr.span, e.to_string()))?;
            let var = c_ident(name);
            match ty {
                Type::Int | Type::Float => {
                    kernel_params.push(format!("{} {var}", c_type(expr.span, ty)?));
                    launch_args.push(var);
                }
                Type::ListInt => {
                    kernel_params.push(format!("int *{var}"));
                    launch_args.push(format!("dev_{var}"));
                    buffers.push((var, "int"));
                }
                Type::ListFloat => {
                    kernel_params.push(format!("float *{var}"));
                    launch_args.push(format!("dev_{var}"));
                    buffers.push((var, "float"));
                }
                Type::String | Type::ListString => {
                    return Err(CudaBackendError::at(
                        expr.span,
                        "strings not yet allowed in parallelization",
                    ));
                }
                Type::Undetermined | Type::Unit => {
                    return Err(CudaBackendError::at(
                        expr.span,
                        format!("captured {var} has type {}", ty.display()),
                    ));
                }
            }
        }

        // The host fragment lives in its own scope so the geometry locals
        // cannot collide with user names.
        let mut host = String::new();
        host.push_str(&format!("int nb_start = {};\n", self.translate_value(start)?));
        host.push_str(&format!("int nb_end = {};\n", self.translate_value(end)?));
        host.push_str("int nb_iters = nb_end - nb_start;\n");
        host.push_str("if (nb_iters < 1) {\n    nb_iters = 1;\n}\n");
        host.push_str(&format!(
            "int nb_threads = nb_iters < {MAX_THREADS_PER_BLOCK} ? nb_iters : {MAX_THREADS_PER_BLOCK};\n"
        ));
        host.push_str("int nb_blocks = (nb_iters + nb_threads - 1) / nb_threads;\n");
        host.push_str(&format!(
            "if (nb_blocks > {MAX_BLOCKS}) {{\n    nb_blocks = {MAX_BLOCKS};\n}}\n"
        ));

        // Device buffers are sized start + iterations elements, enough for
        // every index the kernel touches even though it can undershoot the
        // list's declared length.
        for (var, elem) in &buffers {
            host.push_str(&format!("{elem} *dev_{var};\n"));
            host.push_str(&format!(
                "cudaMalloc((void **) &dev_{var}, (nb_start + nb_iters) * sizeof({elem}));\n"
            ));
            host.push_str(&format!(
                "cudaMemcpy(dev_{var}, {var}, (nb_start + nb_iters) * sizeof({elem}), \
                 cudaMemcpyHostToDevice);\n"
            ));
        }

        host.push_str(&format!(
            "{kernel}<<<nb_blocks, nb_threads>>>({});\n",
            launch_args.join(", ")
        ));
        host.push_str("cudaDeviceSynchronize();\n");

        for (var, elem) in &buffers {
            host.push_str(&format!(
                "cudaMemcpy({var}, dev_{var}, (nb_start + nb_iters) * sizeof({elem}), \
                 cudaMemcpyDeviceToHost);\n"
            ));
            host.push_str(&format!("cudaFree(dev_{var});\n"));
        }

        let cpp = format!("{{\n{}}}\n", indent_block(&host));

        // The kernel covers [nb_start, nb_end) with a grid-stride loop.
        let proto = format!("__global__ void {kernel}({})", kernel_params.join(", "));
        self.cuda_prototypes.push(format!("{proto};\n"));

        let index = c_ident(index);
        let mut cuda = format!("{proto} {{\n");
        cuda.push_str(&format!(
            "    int {index} = blockIdx.x * blockDim.x + threadIdx.x + nb_start;\n\n"
        ));
        cuda.push_str(&format!("    while ({index} < nb_end) {{\n"));
        let mut kernel_body = String::new();
        for e in body {
            let (c, _) = self.translate_stmt(e)?;
            kernel_body.push_str(&c);
        }
        kernel_body.push_str(&format!("{index} += gridDim.x * blockDim.x;\n"));
        cuda.push_str(&indent_block(&indent_block(&kernel_body)));
        cuda.push_str("    }\n");
        cuda.push_str("}\n\n");

        Ok((cpp, cuda))
    }
}

fn makefile(module: &str) -> String {
    let mut m = String::new();
    m.push_str("CUDA_PATH = /usr/local/cuda\n");
    m.push_str("CUDA_INC_PATH = $(CUDA_PATH)/include\n");
    m.push_str("CUDA_BIN_PATH = $(CUDA_PATH)/bin\n");
    m.push_str("CUDA_LIB_PATH = $(CUDA_PATH)/lib64\n");
    m.push_str("NVCC = $(CUDA_BIN_PATH)/nvcc\n");
    m.push_str("CUDAFLAGS = -g -dc -Wno-deprecated-gpu-targets --std=c++11 \\\n");
    m.push_str("            --expt-relaxed-constexpr\n");
    m.push_str("CUDA_LINK_FLAGS = -dlink -Wno-deprecated-gpu-targets\n");
    m.push('\n');
    m.push_str("GPP = g++\n");
    m.push_str("CXXFLAGS = -g -Wall -D_REENTRANT -std=c++0x -pthread\n");
    m.push_str("INCLUDE = -I$(CUDA_INC_PATH)\n");
    m.push_str("LIBS = -L$(CUDA_LIB_PATH) -lcudart\n");
    m.push('\n');
    m.push_str(&format!("all: {module}\n"));
    m.push('\n');
    m.push_str(&format!("{module}.cpp.o: {module}.cpp\n"));
    m.push_str("\t$(GPP) $(CXXFLAGS) -c -o $@ $(INCLUDE) $<\n");
    m.push('\n');
    m.push_str(&format!("{module}.cu.o: {module}.cu\n"));
    m.push_str("\t$(NVCC) $(CUDAFLAGS) -c -o $@ $<\n");
    m.push('\n');
    m.push_str(&format!("cuda.o: {module}.cu.o\n"));
    m.push_str("\t$(NVCC) $(CUDA_LINK_FLAGS) -o $@ $^\n");
    m.push('\n');
    m.push_str(&format!("{module}: {module}.cpp.o {module}.cu.o cuda.o\n"));
    m.push_str("\t$(GPP) $(CXXFLAGS) -o $@ $(INCLUDE) $^ $(LIBS)\n");
    m.push('\n');
    m.push_str("clean:\n");
    m.push_str(&format!("\trm -f {module} *.o\n"));
    m.push('\n');
    m.push_str("full_clean: clean\n");
    m.push_str(&format!(
        "\trm -f {module}.cpp {module}.hpp {module}.cu {module}.cuh Makefile\n"
    ));
    m.push('\n');
    m.push_str(".PHONY: clean full_clean\n");
    m
}
